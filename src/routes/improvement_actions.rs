use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use diesel::dsl::exists;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::email::{dispatch_email, EmailKind, EmailMessage};
use crate::error::{AppError, AppResult};
use crate::improvement::{
    append_follow_up, closure_notes, next_action_code, plan_step, ActionStatus, ClosureVerdict,
    ImprovementError, Step, CODE_PREFIX,
};
use crate::models::{ImprovementAction, ImprovementActionChanges, NewImprovementAction};
use crate::notifications::{active_user_email, notify_users, NewFeedEntry, NotificationKind};
use crate::permissions::{require_permission, ACTIONS_CLOSE, ACTIONS_CREATE, ACTIONS_EDIT};
use crate::schema::{improvement_actions, users};
use crate::state::AppState;
use crate::validation::{max_len, required};

const CODE_ATTEMPTS: usize = 3;

#[derive(Deserialize)]
pub struct ActionListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Deserialize)]
pub struct CreateActionRequest {
    pub title: String,
    pub description: String,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct UpdateActionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct CloseActionRequest {
    pub approved: String,
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct ImprovementActionResponse {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: String,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub closure_approved: Option<String>,
    pub closure_notes: Option<String>,
    pub follow_up_notes: Option<String>,
    pub is_archived: bool,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

impl From<ImprovementAction> for ImprovementActionResponse {
    fn from(action: ImprovementAction) -> Self {
        Self {
            id: action.id,
            code: action.code,
            title: action.title,
            description: action.description,
            origin: action.origin,
            responsible_id: action.responsible_id,
            due_date: action.due_date,
            status: action.status,
            closure_approved: action.closure_approved,
            closure_notes: action.closure_notes,
            follow_up_notes: action.follow_up_notes,
            is_archived: action.is_archived,
            created_by: action.created_by,
            created_at: to_iso(action.created_at),
            updated_at: to_iso(action.updated_at),
            closed_at: action.closed_at.map(to_iso),
        }
    }
}

pub async fn list_actions(
    State(state): State<AppState>,
    Query(params): Query<ActionListQuery>,
) -> AppResult<Json<Vec<ImprovementActionResponse>>> {
    let mut conn = state.db()?;
    let mut query = improvement_actions::table.into_boxed();
    if !params.include_archived {
        query = query.filter(improvement_actions::is_archived.eq(false));
    }
    let actions: Vec<ImprovementAction> = query
        .order(improvement_actions::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(
        actions
            .into_iter()
            .map(ImprovementActionResponse::from)
            .collect(),
    ))
}

pub async fn get_action(
    State(state): State<AppState>,
    Path(action_id): Path<Uuid>,
) -> AppResult<Json<ImprovementActionResponse>> {
    let mut conn = state.db()?;
    let action: ImprovementAction = improvement_actions::table.find(action_id).first(&mut conn)?;
    Ok(Json(action.into()))
}

pub async fn create_action(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateActionRequest>,
) -> AppResult<(StatusCode, Json<ImprovementActionResponse>)> {
    let title = required("title", Some(&payload.title))?;
    max_len("title", &title, 255)?;
    let description = required("description", Some(&payload.description))?;
    let origin = trimmed(payload.origin);
    if let Some(origin) = &origin {
        max_len("origin", origin, 100)?;
    }

    let mut conn = state.db()?;
    require_permission(&mut conn, &user, ACTIONS_CREATE)?;
    if let Some(responsible_id) = payload.responsible_id {
        ensure_active_user(&mut conn, responsible_id)?;
    }

    // Codes are derived from the highest existing one; a concurrent insert
    // surfaces as a unique violation and the next code is tried.
    let mut attempt = 0;
    let action = loop {
        attempt += 1;
        let existing: Vec<String> = improvement_actions::table
            .filter(improvement_actions::code.like(format!("{CODE_PREFIX}-%")))
            .select(improvement_actions::code)
            .load(&mut conn)?;
        let new_action = NewImprovementAction {
            id: Uuid::new_v4(),
            code: next_action_code(existing.iter().map(String::as_str)),
            title: title.clone(),
            description: description.clone(),
            origin: origin.clone(),
            responsible_id: payload.responsible_id,
            due_date: payload.due_date,
            status: ActionStatus::Open.as_str().to_string(),
            created_by: user.user_id,
        };

        match diesel::insert_into(improvement_actions::table)
            .values(&new_action)
            .get_result::<ImprovementAction>(&mut conn)
        {
            Ok(action) => break action,
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
                if attempt < CODE_ATTEMPTS =>
            {
                debug!(code = %new_action.code, attempt, "improvement action code taken; retrying");
            }
            Err(err) => return Err(err.into()),
        }
    };

    info!(action_id = %action.id, code = %action.code, "improvement action created");
    Ok((StatusCode::CREATED, Json(action.into())))
}

pub async fn update_action(
    State(state): State<AppState>,
    Path(action_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateActionRequest>,
) -> AppResult<Json<ImprovementActionResponse>> {
    let title = match payload.title.as_deref() {
        Some(title) => {
            let title = required("title", Some(title))?;
            max_len("title", &title, 255)?;
            Some(title)
        }
        None => None,
    };
    let description = match payload.description.as_deref() {
        Some(description) => Some(required("description", Some(description))?),
        None => None,
    };
    let origin = trimmed(payload.origin);
    if let Some(origin) = &origin {
        max_len("origin", origin, 100)?;
    }

    let mut conn = state.db()?;
    require_permission(&mut conn, &user, ACTIONS_EDIT)?;
    let current: ImprovementAction = improvement_actions::table.find(action_id).first(&mut conn)?;
    let status = status_of(&current)?;
    if !status.is_editable() {
        return Err(ImprovementError::Closed.into());
    }
    if let Some(responsible_id) = payload.responsible_id {
        ensure_active_user(&mut conn, responsible_id)?;
    }

    let changes = ImprovementActionChanges {
        title,
        description,
        origin,
        responsible_id: payload.responsible_id,
        due_date: payload.due_date,
        updated_at: Some(Utc::now().naive_utc()),
    };
    let updated: ImprovementAction = diesel::update(
        improvement_actions::table
            .find(action_id)
            .filter(improvement_actions::status.ne(ActionStatus::Closed.as_str())),
    )
    .set(&changes)
    .get_result(&mut conn)
    .optional()?
    .ok_or(ImprovementError::Closed)?;

    info!(action_id = %action_id, "improvement action updated");
    Ok(Json(updated.into()))
}

pub async fn start_action(
    State(state): State<AppState>,
    Path(action_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ImprovementActionResponse>> {
    let mut conn = state.db()?;
    require_permission(&mut conn, &user, ACTIONS_EDIT)?;
    let current: ImprovementAction = improvement_actions::table.find(action_id).first(&mut conn)?;
    let from = status_of(&current)?;
    let step = plan_step(from, Step::Start)?;

    let started: ImprovementAction = diesel::update(
        improvement_actions::table
            .find(action_id)
            .filter(improvement_actions::status.eq(from.as_str())),
    )
    .set((
        improvement_actions::status.eq(step.to.as_str()),
        improvement_actions::updated_at.eq(Utc::now().naive_utc()),
    ))
    .get_result(&mut conn)
    .optional()?
    .ok_or(ImprovementError::StaleStatus { expected: from })?;

    info!(action_id = %action_id, code = %started.code, "improvement action started");
    Ok(Json(started.into()))
}

pub async fn close_action(
    State(state): State<AppState>,
    Path(action_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CloseActionRequest>,
) -> AppResult<Json<ImprovementActionResponse>> {
    let verdict = ClosureVerdict::parse(&payload.approved)?;
    let notes = closure_notes(verdict, payload.notes.as_deref())?;

    let mut conn = state.db()?;
    require_permission(&mut conn, &user, ACTIONS_CLOSE)?;
    let current: ImprovementAction = improvement_actions::table.find(action_id).first(&mut conn)?;
    let from = status_of(&current)?;
    let step = plan_step(from, Step::Close(verdict))?;

    let now = Utc::now().naive_utc();
    let follow_up_notes = match (step.follow_up, notes.as_deref()) {
        (true, Some(notes)) => Some(append_follow_up(
            current.follow_up_notes.as_deref(),
            now.date(),
            notes,
        )),
        _ => current.follow_up_notes.clone(),
    };

    let closed: ImprovementAction = diesel::update(
        improvement_actions::table
            .find(action_id)
            .filter(improvement_actions::status.eq(from.as_str())),
    )
    .set((
        improvement_actions::status.eq(step.to.as_str()),
        improvement_actions::closure_approved.eq(Some(verdict.as_str())),
        improvement_actions::closure_notes.eq(notes.clone()),
        improvement_actions::follow_up_notes.eq(follow_up_notes),
        improvement_actions::is_archived.eq(step.archive),
        improvement_actions::closed_at.eq(Some(now)),
        improvement_actions::updated_at.eq(now),
    ))
    .get_result(&mut conn)
    .optional()?
    .ok_or(ImprovementError::StaleStatus { expected: from })?;

    info!(
        action_id = %action_id,
        code = %closed.code,
        verdict = verdict.as_str(),
        archived = closed.is_archived,
        "improvement action closed"
    );

    if step.follow_up {
        request_follow_up(&state, &mut conn, &closed, notes.as_deref());
    }

    Ok(Json(closed.into()))
}

/// Tells the responsible user an ineffective action needs more work.
fn request_follow_up(
    state: &AppState,
    conn: &mut PgConnection,
    action: &ImprovementAction,
    notes: Option<&str>,
) {
    let Some(responsible_id) = action.responsible_id else {
        debug!(action_id = %action.id, "no responsible user; skipping follow-up");
        return;
    };

    let message = format!("{} - {}: {}", action.code, action.title, notes.unwrap_or_default());
    notify_users(
        conn,
        &state.hub,
        &[responsible_id],
        NewFeedEntry {
            kind: NotificationKind::ImprovementFollowUp,
            title: "Acción de mejora requiere seguimiento",
            message: &message,
            document_id: None,
        },
    );

    match active_user_email(conn, responsible_id) {
        Ok(Some(address)) => dispatch_email(
            conn,
            EmailMessage::new(
                EmailKind::ImprovementFollowUp,
                vec![address],
                json!({
                    "action_id": action.id,
                    "code": action.code,
                    "title": action.title,
                    "notes": notes,
                    "follow_up_notes": action.follow_up_notes,
                    "due_date": action.due_date,
                }),
            ),
        ),
        Ok(None) => debug!(action_id = %action.id, "responsible user inactive; no email"),
        Err(err) => warn!(
            action_id = %action.id,
            error = %err,
            "failed to resolve responsible user email"
        ),
    }
}

fn ensure_active_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    let active: bool = select(exists(
        users::table
            .find(user_id)
            .filter(users::is_active.eq(true)),
    ))
    .get_result(conn)?;
    if active {
        Ok(())
    } else {
        Err(AppError::bad_request("responsible user does not exist or is inactive"))
    }
}

fn status_of(action: &ImprovementAction) -> AppResult<ActionStatus> {
    ActionStatus::parse(&action.status).ok_or_else(|| {
        AppError::internal(format!(
            "improvement action {} has unknown status {}",
            action.id, action.status
        ))
    })
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
