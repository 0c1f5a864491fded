use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{EmailConfig, EmailProvider};

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("mail provider is not configured")]
    NotConfigured,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Transactional e-mail delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns the provider's message id
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError>;
}

pub fn from_config(config: &EmailConfig) -> std::sync::Arc<dyn Mailer> {
    match config.provider {
        EmailProvider::Resend => std::sync::Arc::new(ResendMailer::new(config)),
        EmailProvider::Log => std::sync::Arc::new(LogMailer),
    }
}

/// Resend-compatible HTTP API (`POST /emails`)
pub struct ResendMailer {
    api_url: String,
    api_key: String,
    from: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            from: config.from_address.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, email: &OutgoingEmail) -> serde_json::Value {
        let attachments: Vec<_> = email
            .attachments
            .iter()
            .map(|a| json!({ "filename": a.filename, "content": STANDARD.encode(&a.bytes) }))
            .collect();
        json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
            "attachments": attachments,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        if self.api_key.is_empty() {
            return Err(MailError::NotConfigured);
        }
        let response = self
            .client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status: status.as_u16(), body });
        }
        let sent: SendResponse = response.json().await?;
        tracing::info!("Sent e-mail '{}' to {} ({})", email.subject, email.to, sent.id);
        Ok(sent.id)
    }
}

/// Development mailer: logs the message instead of delivering it
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let id = format!("log-{}", uuid::Uuid::new_v4());
        tracing::info!(
            "[mail:log] to={} subject='{}' attachments={} id={}",
            email.to,
            email.subject,
            email.attachments.iter().map(|a| a.filename.as_str()).collect::<Vec<_>>().join(","),
            id
        );
        Ok(id)
    }
}

/// Plain-text body to minimal HTML, paragraphs on blank lines
pub fn text_to_html(body: &str) -> String {
    fn escape(text: &str) -> String {
        text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
    }
    body.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape(p).replace('\n', "<br>")))
        .collect()
}
