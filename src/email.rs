use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use diesel::PgConnection;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::jobs::{enqueue_job, JOB_SEND_EMAIL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    DocumentPending,
    DocumentApproved,
    DocumentRejected,
    ImprovementFollowUp,
}

impl EmailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailKind::DocumentPending => "document_pending",
            EmailKind::DocumentApproved => "document_approved",
            EmailKind::DocumentRejected => "document_rejected",
            EmailKind::ImprovementFollowUp => "improvement_follow_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub kind: EmailKind,
    pub recipients: Vec<String>,
    pub payload: Value,
}

impl EmailMessage {
    pub fn new(kind: EmailKind, recipients: Vec<String>, payload: Value) -> Self {
        Self {
            kind,
            recipients,
            payload,
        }
    }

    pub fn subject(&self) -> String {
        let field = |key: &str| {
            self.payload
                .get(key)
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };

        match self.kind {
            EmailKind::DocumentPending => format!(
                "Documento pendiente de aprobación: {} v{}",
                field("code"),
                field("version")
            ),
            EmailKind::DocumentApproved => format!(
                "Documento aprobado: {} v{}",
                field("code"),
                field("version")
            ),
            EmailKind::DocumentRejected => format!(
                "Documento rechazado: {} v{}",
                field("code"),
                field("version")
            ),
            EmailKind::ImprovementFollowUp => {
                format!("Acción de mejora {} requiere seguimiento", field("code"))
            }
        }
    }
}

/// Transactional email transport.
#[async_trait]
pub trait EmailRelay: Send + Sync + 'static {
    /// Returns the relay's message id.
    async fn send(&self, message: &EmailMessage) -> Result<String>;
}

pub struct HttpEmailRelay {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpEmailRelay {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    message_id: String,
}

#[async_trait]
impl EmailRelay for HttpEmailRelay {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let body = json!({
            "type": message.kind.as_str(),
            "from": self.from,
            "to": message.recipients,
            "subject": message.subject(),
            "payload": message.payload,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("email relay request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("email relay returned {status}: {text}");
        }

        let parsed: RelayResponse = response
            .json()
            .await
            .context("email relay returned an unexpected body")?;
        Ok(parsed.message_id)
    }
}

/// Used when no relay is configured: messages are only logged.
pub struct LogOnlyRelay;

#[async_trait]
impl EmailRelay for LogOnlyRelay {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        info!(
            kind = message.kind.as_str(),
            recipients = message.recipients.len(),
            subject = %message.subject(),
            "email relay not configured; message logged only"
        );
        Ok(format!("log-only-{}", uuid::Uuid::new_v4()))
    }
}

pub fn relay_from_config(config: &AppConfig) -> std::sync::Arc<dyn EmailRelay> {
    match &config.email_relay_url {
        Some(url) => std::sync::Arc::new(HttpEmailRelay::new(
            url.clone(),
            config.email_relay_api_key.clone(),
            config.email_from.clone(),
        )),
        None => std::sync::Arc::new(LogOnlyRelay),
    }
}

/// Queues a message for the worker. Never fails the caller.
pub fn dispatch_email(conn: &mut PgConnection, message: EmailMessage) {
    if message.recipients.is_empty() {
        return;
    }
    let kind = message.kind;
    let payload = match serde_json::to_value(&message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(kind = kind.as_str(), error = %err, "failed to serialise email");
            return;
        }
    };
    if let Err(err) = enqueue_job(conn, JOB_SEND_EMAIL, payload, None) {
        warn!(kind = kind.as_str(), error = %err, "failed to enqueue email");
    }
}
