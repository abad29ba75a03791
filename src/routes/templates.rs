use axum::extract::{Json, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::render::{
    document_payload, flat_payload, merge_payload, RenderPayload, RenderedDocument,
};
use crate::schema::documents;
use crate::state::AppState;
use crate::storage::attachment_disposition;
use crate::validation::ValidationError;

#[derive(Deserialize)]
pub struct RenderTemplateRequest {
    #[serde(default)]
    pub data: Value,
}

#[derive(Deserialize)]
pub struct RenderDocumentRequest {
    pub template_code: String,
    #[serde(default)]
    pub data: Value,
}

pub async fn render_template(
    State(state): State<AppState>,
    Path(template_code): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<RenderTemplateRequest>,
) -> AppResult<Response> {
    let template_code = check_template_code(&template_code)?;
    let data = flat_payload(payload.data)?;

    let rendered = render(&state, &template_code, &data).await?;
    info!(template = %template_code, actor = %user.user_id, "template rendered");
    Ok(attachment(rendered))
}

/// Fills a template with a document's fields; request data overrides them.
pub async fn render_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<RenderDocumentRequest>,
) -> AppResult<Response> {
    let template_code = check_template_code(&payload.template_code)?;
    let overrides = flat_payload(payload.data)?;

    let mut conn = state.db()?;
    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    drop(conn);

    let data = merge_payload(document_payload(&document), overrides);
    let rendered = render(&state, &template_code, &data).await?;
    info!(
        template = %template_code,
        document_id = %document_id,
        actor = %user.user_id,
        "document rendered"
    );
    Ok(attachment(rendered))
}

async fn render(
    state: &AppState,
    template_code: &str,
    data: &RenderPayload,
) -> AppResult<RenderedDocument> {
    state
        .renderer
        .render(template_code, data)
        .await
        .map_err(|err| {
            error!(template = %template_code, error = %err, "document generation failed");
            AppError::new(
                StatusCode::BAD_GATEWAY,
                format!("document generation failed: {err}"),
            )
        })
}

fn attachment(rendered: RenderedDocument) -> Response {
    let mut response = (
        [(header::CONTENT_TYPE, rendered.content_type)],
        rendered.bytes,
    )
        .into_response();
    if let Some(disposition) = attachment_disposition(&rendered.file_name)
        .and_then(|value| header::HeaderValue::from_str(&value).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    response
}

fn check_template_code(raw: &str) -> AppResult<String> {
    let code = raw.trim();
    let valid = !code.is_empty()
        && code.len() <= 100
        && code
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(code.to_string())
    } else {
        Err(ValidationError::Invalid {
            field: "template_code",
            reason: "use letters, digits, '-' or '_'".to_string(),
        }
        .into())
    }
}
