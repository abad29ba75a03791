use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod documents;
pub mod health;
pub mod improvement_actions;
pub mod notifications;
pub mod templates;
pub mod users;

/// Multipart framing on top of the largest accepted file.
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route("/pending", get(documents::list_pending_documents))
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::edit_document)
                .delete(documents::delete_document),
        )
        .route("/:id/history", get(documents::document_history))
        .route("/:id/download", get(documents::download_document))
        .route("/:id/submit", post(documents::submit_document))
        .route("/:id/approve", post(documents::approve_document))
        .route("/:id/reject", post(documents::reject_document))
        .route("/:id/render", post(templates::render_document));

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/stream", get(notifications::notification_stream))
        .route("/read-all", post(notifications::mark_all_as_read))
        .route("/:id", delete(notifications::delete_notification))
        .route("/:id/read", post(notifications::mark_as_read));

    let improvement_routes = Router::new()
        .route(
            "/",
            get(improvement_actions::list_actions).post(improvement_actions::create_action),
        )
        .route(
            "/:id",
            get(improvement_actions::get_action).patch(improvement_actions::update_action),
        )
        .route("/:id/start", post(improvement_actions::start_action))
        .route("/:id/close", post(improvement_actions::close_action));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/:id/deactivate", post(users::deactivate_user))
        .route("/:id/reactivate", post(users::reactivate_user))
        .route("/:id/permissions", post(users::grant_permission))
        .route("/:id/permissions/:code", delete(users::revoke_permission));

    let templates_routes = Router::new().route("/:code/render", post(templates::render_template));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/improvement-actions", improvement_routes)
        .nest("/api/users", users_routes)
        .nest("/api/templates", templates_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let body_limit = state.config.upload_max_bytes + BODY_LIMIT_OVERHEAD;

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
