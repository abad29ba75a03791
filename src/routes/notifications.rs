use std::convert::Infallible;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use diesel::prelude::*;
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use uuid::Uuid;

use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Notification;
use crate::notifications::{unread_in_page, FEED_LIMIT};
use crate::schema::{documents, notifications};
use crate::state::AppState;

#[derive(Serialize)]
pub struct NotificationDocument {
    pub code: String,
    pub name: String,
    pub version: i32,
    pub status: String,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub document_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: String,
    pub document: Option<NotificationDocument>,
}

#[derive(Serialize)]
pub struct NotificationFeed {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: usize,
}

#[derive(Serialize)]
pub struct MarkAllResponse {
    pub updated: usize,
}

type DocumentSummary = (String, String, i32, String);

/// The caller's 50 most recent notifications. `unread_count` only covers
/// this page.
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationFeed>> {
    let mut conn = state.db()?;
    let rows: Vec<(Notification, Option<DocumentSummary>)> = notifications::table
        .left_join(documents::table)
        .filter(notifications::user_id.eq(user.user_id))
        .order(notifications::created_at.desc())
        .limit(FEED_LIMIT)
        .select((
            notifications::all_columns,
            (
                documents::code,
                documents::name,
                documents::version,
                documents::status,
            )
                .nullable(),
        ))
        .load(&mut conn)?;

    let unread_count = unread_in_page(&rows, |(notification, _)| notification.is_read);
    let notifications = rows
        .into_iter()
        .map(|(notification, document)| NotificationResponse {
            id: notification.id,
            notification_type: notification.notification_type,
            title: notification.title,
            message: notification.message,
            document_id: notification.document_id,
            is_read: notification.is_read,
            created_at: to_iso(notification.created_at),
            document: document.map(|(code, name, version, status)| NotificationDocument {
                code,
                name,
                version,
                status,
            }),
        })
        .collect();

    Ok(Json(NotificationFeed {
        notifications,
        unread_count,
    }))
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .find(notification_id)
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    state.hub.publish(user.user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_as_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkAllResponse>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    if updated > 0 {
        state.hub.publish(user.user_id);
    }
    debug!(user_id = %user.user_id, updated, "notifications marked as read");
    Ok(Json(MarkAllResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notifications::table
            .find(notification_id)
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    state.hub.publish(user.user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Emits `changed` whenever the caller's feed changes; clients refetch.
pub async fn notification_stream(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = user.user_id;
    let receiver = state.hub.subscribe();

    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(changed) if changed == user_id => break,
                Ok(_) => continue,
                // Missed signals may have been ours.
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%user_id, skipped, "notification stream lagged");
                    break;
                }
                Err(RecvError::Closed) => return None,
            }
        }
        let event = Event::default().event("changed").data(user_id.to_string());
        Some((Ok(event), receiver))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
