use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{email::EmailMessage, jobs::JOB_SEND_EMAIL, models::Job, state::AppState};

use super::{JobExecution, JobHandler};

/// Delivers one queued message through the configured relay. Failed
/// deliveries are not retried.
pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let message: EmailMessage = match serde_json::from_value(job.payload.clone()) {
            Ok(message) => message,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };
        deliver(&state, &message).await
    }
}

pub async fn deliver(state: &AppState, message: &EmailMessage) -> JobExecution {
    if message.recipients.is_empty() {
        return JobExecution::Success;
    }

    match state.mailer.send(message).await {
        Ok(message_id) => {
            info!(
                kind = message.kind.as_str(),
                recipients = message.recipients.len(),
                %message_id,
                "email delivered"
            );
            JobExecution::Success
        }
        Err(err) => {
            warn!(
                kind = message.kind.as_str(),
                recipients = message.recipients.len(),
                error = %err,
                "email delivery failed"
            );
            JobExecution::Failed {
                error: format!("{err:#}"),
            }
        }
    }
}
