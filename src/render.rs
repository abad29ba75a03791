use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::{json, Map, Value};

use crate::config::AppConfig;
use crate::models::Document;
use crate::validation::ValidationError;

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Template fields the render service understands: a flat map of scalars.
pub type RenderPayload = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync + 'static {
    async fn render(&self, template_code: &str, data: &RenderPayload) -> Result<RenderedDocument>;
}

pub struct HttpRenderer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRenderer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn render(&self, template_code: &str, data: &RenderPayload) -> Result<RenderedDocument> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "template": template_code, "data": data }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("render request for template {template_code} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("render service returned {status}: {text}");
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DOCX_CONTENT_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .context("failed to read rendered document")?;

        Ok(RenderedDocument {
            bytes,
            file_name: rendered_file_name(template_code, data),
            content_type,
        })
    }
}

/// Used when no render service is configured.
pub struct DisabledRenderer;

#[async_trait]
impl DocumentRenderer for DisabledRenderer {
    async fn render(&self, template_code: &str, _data: &RenderPayload) -> Result<RenderedDocument> {
        Err(anyhow!(
            "document generation is not configured (template {template_code})"
        ))
    }
}

pub fn renderer_from_config(config: &AppConfig) -> Arc<dyn DocumentRenderer> {
    match &config.render_service_url {
        Some(url) => Arc::new(HttpRenderer::new(
            url.clone(),
            config.render_service_api_key.clone(),
        )),
        None => Arc::new(DisabledRenderer),
    }
}

/// Accepts only a JSON object whose values are scalars.
pub fn flat_payload(data: Value) -> Result<RenderPayload, ValidationError> {
    let map = match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            return Err(ValidationError::Invalid {
                field: "data",
                reason: "must be an object".to_string(),
            })
        }
    };

    if let Some((key, _)) = map
        .iter()
        .find(|(_, value)| matches!(value, Value::Array(_) | Value::Object(_)))
    {
        return Err(ValidationError::Invalid {
            field: "data",
            reason: format!("'{key}' must be a string, number, boolean or null"),
        });
    }
    Ok(map)
}

/// Display fields of a document, as template placeholders.
pub fn document_payload(document: &Document) -> RenderPayload {
    let text = |value: &Option<String>| value.clone().map(Value::String).unwrap_or(Value::Null);

    let mut payload = Map::new();
    payload.insert("code".into(), Value::String(document.code.clone()));
    payload.insert("name".into(), Value::String(document.name.clone()));
    payload.insert("version".into(), json!(document.version));
    payload.insert("status".into(), Value::String(document.status.clone()));
    payload.insert("objective".into(), text(&document.objective));
    payload.insert("scope".into(), text(&document.scope));
    payload.insert("responsible".into(), text(&document.responsible));
    payload.insert("storage_location".into(), text(&document.storage_location));
    payload.insert("retention_period".into(), text(&document.retention_period));
    payload.insert("final_disposition".into(), text(&document.final_disposition));
    payload.insert("change_reason".into(), text(&document.change_reason));
    payload.insert(
        "change_date".into(),
        document
            .change_date
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
    );
    payload
}

/// Caller-supplied values win over the document's own fields.
pub fn merge_payload(mut base: RenderPayload, overrides: RenderPayload) -> RenderPayload {
    base.extend(overrides);
    base
}

fn rendered_file_name(template_code: &str, data: &RenderPayload) -> String {
    match (data.get("code"), data.get("version")) {
        (Some(Value::String(code)), Some(version)) => {
            format!("{code}-v{version}-{template_code}.docx")
        }
        (Some(Value::String(code)), None) => format!("{code}-{template_code}.docx"),
        _ => format!("{template_code}.docx"),
    }
}
