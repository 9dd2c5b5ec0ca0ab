//! Email notifications through the Mailtrap send API.
//!
//! A job opts in through its `notifications` map and names the recipient in
//! its `context`:
//!
//! ```json
//! { "notifications": { "email": { "enabled": true, "on": ["FAILURE"] } },
//!   "context": { "email": "ops@example.com" } }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use jobforge_core::{Job, JobEvent};

use super::{NotificationError, NotificationProvider};

const SEND_URL: &str = "https://send.api.mailtrap.io/api/send";
const SANDBOX_URL: &str = "https://sandbox.api.mailtrap.io/api/send";

#[derive(Debug, Clone)]
pub struct MailtrapConfig {
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: String,
    pub use_sandbox: bool,
    /// Required when `use_sandbox` is set.
    pub inbox_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EmailProvider {
    http: reqwest::Client,
    endpoint: String,
    config: MailtrapConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Address {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Mail {
    from: Address,
    to: Vec<Address>,
    subject: String,
    text: String,
    category: &'static str,
}

impl EmailProvider {
    pub fn new(config: MailtrapConfig) -> Result<Self, NotificationError> {
        let endpoint = if config.use_sandbox {
            let inbox = config.inbox_id.ok_or_else(|| {
                NotificationError::Config("MAILTRAP_INBOX_ID is required in sandbox mode".into())
            })?;
            format!("{SANDBOX_URL}/{inbox}")
        } else {
            SEND_URL.to_string()
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_mail(&self, job: &Job, event: JobEvent, recipient: &str) -> Mail {
        Mail {
            from: Address {
                email: self.config.sender_email.clone(),
                name: Some(self.config.sender_name.clone()),
            },
            to: vec![Address {
                email: recipient.to_string(),
                name: None,
            }],
            subject: format!("Job {} {}", job.job_id(), event),
            text: format!(
                "Job ID: {}\nType: {}\nStatus: {}\nEvent: {}\n",
                job.job_id(),
                job.job_type(),
                job.status(),
                event
            ),
            category: "job_notification",
        }
    }
}

/// Whether the job subscribed to email for `event`.
fn wants_email(job: &Job, event: JobEvent) -> bool {
    let Some(email) = job.notifications().get("email") else {
        return false;
    };
    let enabled = email
        .get("enabled")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let subscribed = email
        .get("on")
        .and_then(JsonValue::as_array)
        .is_some_and(|events| events.iter().any(|e| e.as_str() == Some(event.as_str())));
    enabled && subscribed
}

fn recipient(job: &Job) -> Option<&str> {
    job.context()
        .get("email")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, job: &Job, event: JobEvent) -> Result<(), NotificationError> {
        if !wants_email(job, event) {
            return Ok(());
        }
        let Some(to) = recipient(job) else {
            warn!(job_id = %job.job_id(), "email notification skipped: no recipient");
            return Ok(());
        };

        let mail = self.build_mail(job, event, to);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&mail)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(job_id = %job.job_id(), event = %event, recipient = to, "email notification sent");
        Ok(())
    }
}
