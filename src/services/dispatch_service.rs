//! `process-and-send-protocol`: render, upload, e-mail and record a protocol
//! exactly once per idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::Json;
use sqlx::PgPool;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::document_service::{DocumentService, DocumentSource};
use super::protocol_service::ProtocolService;
use super::{require, ServiceError};
use crate::auth::AuthUser;
use crate::database::models::client::is_valid_email;
use crate::database::models::dispatch::{derive_idempotency_key, DispatchStatus, ProtocolDispatch};
use crate::database::models::email_log::{EmailStatus, NewEmailLog};
use crate::database::models::protocol::ProtocolStatus;
use crate::database::models::user::Permission;
use crate::documents::{DocumentFormat, RenderedDocument};
use crate::integrations::mailer::text_to_html;
use crate::integrations::{Attachment, Bucket, Mailer, ObjectStore, OutgoingEmail};

/// A pending claim older than this is treated as abandoned
const STALE_PENDING_SECS: f64 = 600.0;
const MAX_KEY_LEN: usize = 200;

/// A delivered send must be recorded, or a stale claim would e-mail it again
const RECORD_ATTEMPTS: u32 = 5;
const RECORD_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct SendInput {
    pub subject: String,
    pub body: String,
    pub recipient: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Result of a send, also stored under the idempotency key for replays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub protocol_id: Uuid,
    pub number: String,
    pub recipient: String,
    pub format: DocumentFormat,
    pub document_url: String,
    pub message_id: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    #[serde(default)]
    pub replayed: bool,
}

enum Claim {
    Acquired,
    Replay(SendOutcome),
}

pub struct DispatchService {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
    mailer: Arc<dyn Mailer>,
}

fn required(field: &str, value: &str) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ServiceError::validation(field, format!("{} is required", field)))
    } else {
        Ok(value.to_string())
    }
}

fn check_key(key: &str) -> Result<String, ServiceError> {
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN || !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ServiceError::validation(
            "Idempotency-Key",
            format!("must be 1 to {} visible ASCII characters", MAX_KEY_LEN),
        ));
    }
    Ok(key.to_string())
}

/// Inputs that change the rendered document; status and timestamps are excluded
fn document_fingerprint(source: &DocumentSource) -> String {
    json!({
        "content": source.protocol.content.0,
        "manager_signature": source.protocol.manager_signature,
        "client_signature": source.protocol.client_signature,
    })
    .to_string()
}

impl DispatchService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { pool, store, mailer }
    }

    fn documents(&self) -> DocumentService {
        DocumentService::new(self.pool.clone(), self.store.clone())
    }

    pub async fn send(&self, user: &AuthUser, protocol_id: Uuid, input: SendInput) -> Result<SendOutcome, ServiceError> {
        require(user, Permission::SendProtocols)?;
        let subject = required("emailSubject", &input.subject)?;
        let body = required("emailBody", &input.body)?;

        let source = self.documents().load(protocol_id).await?;
        source.protocol.status.transition(ProtocolStatus::Sent)?;

        let recipient = input
            .recipient
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .or_else(|| source.client.email.clone())
            .ok_or_else(|| ServiceError::validation("recipientEmail", "No recipient given and the client has no e-mail"))?;
        if !is_valid_email(&recipient) {
            return Err(ServiceError::validation("recipientEmail", "Invalid e-mail address"));
        }

        let key = match input.idempotency_key.as_deref() {
            Some(key) => check_key(key)?,
            None => derive_idempotency_key(protocol_id, &recipient, &subject, &body, &document_fingerprint(&source)),
        };

        match self.claim(&key, protocol_id).await? {
            Claim::Replay(outcome) => {
                tracing::info!("Replaying dispatch {} for protocol {}", key, source.protocol.number);
                Ok(outcome)
            }
            Claim::Acquired => self.deliver(user, &key, &source, &recipient, &subject, &body).await,
        }
    }

    /// Takes the key as `pending`. A failed or abandoned key can be taken
    /// again; a sent key replays its stored outcome.
    async fn claim(&self, key: &str, protocol_id: Uuid) -> Result<Claim, ServiceError> {
        let claimed = sqlx::query_as::<_, ProtocolDispatch>(
            r#"
            INSERT INTO protocol_dispatches (idempotency_key, protocol_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (idempotency_key) DO UPDATE
                SET status = EXCLUDED.status, response = NULL, updated_at = now()
                WHERE protocol_dispatches.protocol_id = EXCLUDED.protocol_id
                  AND (protocol_dispatches.status = $4
                       OR (protocol_dispatches.status = $3
                           AND protocol_dispatches.updated_at < now() - make_interval(secs => $5)))
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(protocol_id)
        .bind(DispatchStatus::Pending)
        .bind(DispatchStatus::Failed)
        .bind(STALE_PENDING_SECS)
        .fetch_optional(&self.pool)
        .await?;
        if claimed.is_some() {
            return Ok(Claim::Acquired);
        }

        let existing = sqlx::query_as::<_, ProtocolDispatch>("SELECT * FROM protocol_dispatches WHERE idempotency_key = $1")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        if existing.protocol_id != protocol_id {
            return Err(ServiceError::Conflict("Idempotency key was already used for another protocol".to_string()));
        }
        match (existing.status, existing.response) {
            (DispatchStatus::Sent, Some(response)) => {
                let mut outcome: SendOutcome = serde_json::from_value(response).map_err(|e| {
                    tracing::error!("Stored dispatch response for {} is unreadable: {}", key, e);
                    ServiceError::Conflict("This send was already completed".to_string())
                })?;
                outcome.replayed = true;
                Ok(Claim::Replay(outcome))
            }
            _ => Err(ServiceError::Conflict("A send with this idempotency key is already in progress".to_string())),
        }
    }

    async fn deliver(
        &self,
        user: &AuthUser,
        key: &str,
        source: &DocumentSource,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendOutcome, ServiceError> {
        let protocol = &source.protocol;

        let (document, path, document_url) = match self.prepare(source).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release(key).await;
                return Err(e);
            }
        };

        let email = OutgoingEmail {
            to: recipient.to_string(),
            subject: subject.to_string(),
            html: text_to_html(body),
            attachments: vec![Attachment {
                filename: document.filename.clone(),
                content_type: document.format.content_type().to_string(),
                bytes: document.bytes,
            }],
        };

        let message_id = match self.mailer.send(&email).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Sending protocol {} to {} failed: {}", protocol.number, recipient, e);
                if let Err(cleanup) = self.store.delete(Bucket::ProcessedDocuments, &path).await {
                    tracing::warn!("Could not remove undelivered document {}: {}", path, cleanup);
                }
                let error = e.to_string();
                self.log_email(NewEmailLog {
                    protocol_id: protocol.id,
                    recipient,
                    subject,
                    status: EmailStatus::Failed,
                    provider_message_id: None,
                    document_url: None,
                    error: Some(&error),
                    sent_by: Some(user.id),
                })
                .await;
                self.release(key).await;
                return Err(e.into());
            }
        };

        self.log_email(NewEmailLog {
            protocol_id: protocol.id,
            recipient,
            subject,
            status: EmailStatus::Sent,
            provider_message_id: Some(&message_id),
            document_url: Some(&document_url),
            error: None,
            sent_by: Some(user.id),
        })
        .await;

        // the e-mail is out; the outcome is recorded even if the status update fails
        let marked = ProtocolService::new(self.pool.clone()).mark_sent(protocol.id, &document_url).await;
        let outcome = SendOutcome {
            protocol_id: protocol.id,
            number: protocol.number.clone(),
            recipient: recipient.to_string(),
            format: document.format,
            document_url,
            message_id,
            sent_at: marked.as_ref().ok().and_then(|p| p.sent_at),
            idempotency_key: key.to_string(),
            replayed: false,
        };
        with_backoff(RECORD_ATTEMPTS, RECORD_BACKOFF, || self.record(key, &outcome))
            .await
            .map_err(|e| {
                tracing::error!(
                    "Protocol {} was e-mailed as {} but dispatch {} could not be recorded: {}",
                    protocol.number,
                    outcome.message_id,
                    key,
                    e
                );
                e
            })?;
        marked?;

        tracing::info!("Protocol {} sent to {} by {}", protocol.number, recipient, user.id);
        Ok(outcome)
    }

    /// Renders DOCX when a template file exists, else PDF, and uploads it
    async fn prepare(&self, source: &DocumentSource) -> Result<(RenderedDocument, String, String), ServiceError> {
        let documents = self.documents();
        let format = match documents.template_file(source).await? {
            Some(_) => DocumentFormat::Docx,
            None => DocumentFormat::Pdf,
        };
        let document = documents.render(source, format).await?;

        let stem = document.filename.trim_end_matches(&format!(".{}", format.extension())).to_string();
        let path = format!(
            "{}/{}-{}.{}",
            source.protocol.id,
            stem,
            Utc::now().timestamp_millis(),
            format.extension()
        );
        self.store
            .put(Bucket::ProcessedDocuments, &path, document.bytes.clone(), format.content_type())
            .await?;
        let url = self.store.public_url(Bucket::ProcessedDocuments, &path);
        Ok((document, path, url))
    }

    async fn record(&self, key: &str, outcome: &SendOutcome) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE protocol_dispatches SET status = $2, response = $3, updated_at = now() WHERE idempotency_key = $1",
        )
        .bind(key)
        .bind(DispatchStatus::Sent)
        .bind(Json(outcome))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks the key failed so the same request may be retried
    async fn release(&self, key: &str) {
        let result = sqlx::query(
            "UPDATE protocol_dispatches SET status = $2, updated_at = now() WHERE idempotency_key = $1",
        )
        .bind(key)
        .bind(DispatchStatus::Failed)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::error!("Could not release dispatch {}: {}", key, e);
        }
    }

    async fn log_email(&self, entry: NewEmailLog<'_>) {
        let result = sqlx::query(
            r#"
            INSERT INTO email_log (protocol_id, recipient, subject, status, provider_message_id, document_url, error, sent_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.protocol_id)
        .bind(entry.recipient)
        .bind(entry.subject)
        .bind(entry.status)
        .bind(entry.provider_message_id)
        .bind(entry.document_url)
        .bind(entry.error)
        .bind(entry.sent_by)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::error!("Could not write e-mail log for protocol {}: {}", entry.protocol_id, e);
        }
    }
}

/// Runs `op` up to `attempts` times, doubling the pause after each failure
async fn with_backoff<T, E, F, Fut>(attempts: u32, initial: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = initial;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!("Attempt {}/{} failed, retrying in {:?}: {}", attempt, attempts, delay, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::user::Role;
    use crate::testing::{self, TestContext};

    #[test]
    fn explicit_keys_are_trimmed_and_bounded() {
        assert_eq!(check_key("  send-42 ").unwrap(), "send-42");
        assert!(check_key("").is_err());
        assert!(check_key("has space").is_err());
        assert!(check_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn subject_and_body_are_required() {
        assert!(matches!(required("emailSubject", "  "), Err(ServiceError::Validation { ref field, .. }) if field == "emailSubject"));
        assert_eq!(required("emailBody", " Dzień dobry ").unwrap(), "Dzień dobry");
    }

    #[test]
    fn outcome_replay_flag_defaults_to_false() {
        let stored = json!({
            "protocol_id": "0b7f9b4e-9a33-4c1e-8a39-1d8f9fdb5e11",
            "number": "PROT/2024/0001",
            "recipient": "klient@example.com",
            "format": "pdf",
            "document_url": "http://localhost/storage/processed-documents/x.pdf",
            "message_id": "msg_1",
            "sent_at": null,
            "idempotency_key": "abc"
        });
        let outcome: SendOutcome = serde_json::from_value(stored).unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.format, DocumentFormat::Pdf);
    }

    #[tokio::test]
    async fn recording_is_retried_until_it_sticks() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let flaky = move || async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err("connection reset"),
                _ => Ok("recorded"),
            }
        };
        assert_eq!(with_backoff(3, Duration::from_millis(1), flaky).await, Ok("recorded"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        assert_eq!(with_backoff(2, Duration::from_millis(1), flaky).await, Err("connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn input(recipient: Option<&str>) -> SendInput {
        SendInput {
            subject: "Protokół odbioru".to_string(),
            body: "W załączeniu protokół.".to_string(),
            recipient: recipient.map(str::to_string),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn repeated_send_replays_the_first_outcome() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, Some("klient@example.com")).await;
        let protocol = testing::create_protocol(&ctx.state, &client).await;
        let manager = testing::user(Role::Manager);

        let first = ctx.state.dispatch().send(&manager, protocol.id, input(None)).await.unwrap();
        assert!(!first.replayed);
        assert_eq!(first.recipient, "klient@example.com");
        assert_eq!(first.format, DocumentFormat::Pdf);

        let second = ctx.state.dispatch().send(&manager, protocol.id, input(None)).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(ctx.mailer.sent().len(), 1);

        let sent = ctx.state.protocols().select_404(protocol.id).await.unwrap();
        assert_eq!(sent.status, ProtocolStatus::Sent);
        assert_eq!(sent.document_url.as_deref(), Some(first.document_url.as_str()));
    }

    #[tokio::test]
    async fn key_reused_for_another_protocol_conflicts() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, Some("klient@example.com")).await;
        let a = testing::create_protocol(&ctx.state, &client).await;
        let b = testing::create_protocol(&ctx.state, &client).await;
        let manager = testing::user(Role::Manager);
        let key = format!("send-{}", Uuid::new_v4());

        let mut with_key = input(None);
        with_key.idempotency_key = Some(key.clone());
        ctx.state.dispatch().send(&manager, a.id, with_key).await.unwrap();

        let mut reused = input(None);
        reused.idempotency_key = Some(key);
        assert!(matches!(
            ctx.state.dispatch().send(&manager, b.id, reused).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn failed_delivery_can_be_retried() {
        let Some((state, _dir)) = TestContext::failing_mail().await else { return };
        let client = testing::create_client(&state, None).await;
        let protocol = testing::create_protocol(&state, &client).await;
        let manager = testing::user(Role::Manager);

        // no client e-mail and no explicit recipient
        assert!(matches!(
            state.dispatch().send(&manager, protocol.id, input(None)).await,
            Err(ServiceError::Validation { ref field, .. }) if field == "recipientEmail"
        ));

        let err = state.dispatch().send(&manager, protocol.id, input(Some("biuro@example.com"))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Mail(_)));
        let unchanged = state.protocols().select_404(protocol.id).await.unwrap();
        assert_eq!(unchanged.status, ProtocolStatus::Draft);

        // the released key is taken again rather than reported as in progress
        let err = state.dispatch().send(&manager, protocol.id, input(Some("biuro@example.com"))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Mail(_)));
    }

    #[tokio::test]
    async fn workers_cannot_send() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, Some("klient@example.com")).await;
        let protocol = testing::create_protocol(&ctx.state, &client).await;
        assert!(matches!(
            ctx.state.dispatch().send(&testing::user(Role::Worker), protocol.id, input(None)).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(ctx.mailer.sent().is_empty());
    }
}
