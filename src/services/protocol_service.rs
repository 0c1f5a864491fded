use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::template_service::{ensure_visible, fetch_template};
use super::{require, ServiceError};
use crate::auth::AuthUser;
use crate::config::CONFIG;
use crate::database::models::client::{Client, ClientStatus};
use crate::database::models::protocol::{
    decode_signature, format_number, numbering_scope, Protocol, ProtocolContent, ProtocolStatus, WorkflowError, PROTOCOLS,
};
use crate::database::models::settings::DEFAULT_NUMBERING_FORMAT;
use crate::database::models::template::{PublishStatus, TemplateKind};
use crate::database::models::user::{Permission, Role};
use crate::database::Repository;
use crate::filter::FilterData;

/// Attempts at finding a free number before giving up
const NUMBERING_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProtocol {
    pub client_id: Uuid,
    #[serde(default)]
    pub content: Option<ProtocolContent>,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub template_kind: Option<TemplateKind>,
}

/// `None` leaves a signature unchanged, an empty string clears it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignaturesInput {
    pub manager_signature: Option<String>,
    pub client_signature: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReorderInput {
    pub from: usize,
    pub to: usize,
}

pub struct ProtocolService {
    pool: PgPool,
}

impl ProtocolService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn select_any(&self, filter: FilterData) -> Result<Vec<Protocol>, ServiceError> {
        Ok(Repository::<Protocol>::new(PROTOCOLS, self.pool.clone()).select_any(filter).await?)
    }

    pub async fn select_404(&self, id: Uuid) -> Result<Protocol, ServiceError> {
        sqlx::query_as::<_, Protocol>("SELECT * FROM protocols WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Creates a draft protocol, optionally seeded from a published template
    pub async fn create_one(&self, user: &AuthUser, input: NewProtocol) -> Result<Protocol, ServiceError> {
        require(user, Permission::EditRecords)?;

        let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
            .bind(input.client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::validation("client_id", "Client does not exist"))?;
        if client.status == ClientStatus::Inactive {
            return Err(ServiceError::Unprocessable(format!("Client {} is inactive", client.id)));
        }

        let (mut content, template_kind) = match (input.template_id, input.template_kind) {
            (Some(template_id), Some(kind)) => {
                let template = fetch_template(&self.pool, kind, template_id)
                    .await?
                    .ok_or_else(|| ServiceError::validation("template_id", "Template does not exist"))?;
                ensure_visible(user, kind, &template)?;
                if template.status != PublishStatus::Published {
                    return Err(ServiceError::Unprocessable(format!("Template '{}' is not published", template.name)));
                }
                let content = template
                    .content
                    .0
                    .to_protocol_content()
                    .map_err(|e| ServiceError::Unprocessable(format!("Template content is invalid: {}", e)))?;
                (content, Some(kind))
            }
            (Some(_), None) => {
                return Err(ServiceError::validation("template_kind", "Template kind is required with template_id"))
            }
            (None, _) => (input.content.unwrap_or_default(), None),
        };
        content.fill_client_defaults(&client.name, client.company_name.as_deref());

        let number = next_number(&self.pool).await?;
        let protocol = sqlx::query_as::<_, Protocol>(
            r#"
            INSERT INTO protocols (number, client_id, template_id, template_kind, content, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&number)
        .bind(client.id)
        .bind(input.template_id)
        .bind(template_kind)
        .bind(Json(&content))
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Protocol {} ({}) created by {}", protocol.number, protocol.id, user.id);
        Ok(protocol)
    }

    /// Replaces the content; allowed until the protocol is completed
    pub async fn update_content(
        &self,
        user: &AuthUser,
        id: Uuid,
        content: ProtocolContent,
    ) -> Result<Protocol, ServiceError> {
        require(user, Permission::EditRecords)?;
        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        current.status.ensure_editable()?;

        let protocol = save_content(&mut tx, id, &content).await?;
        tx.commit().await?;
        Ok(protocol)
    }

    /// Moves one item; positions change, the set of items does not
    pub async fn reorder_items(&self, user: &AuthUser, id: Uuid, input: ReorderInput) -> Result<Protocol, ServiceError> {
        require(user, Permission::EditRecords)?;
        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        current.status.ensure_editable()?;

        let mut content = current.content.0;
        content
            .move_item(input.from, input.to)
            .map_err(|message| ServiceError::validation("items", message))?;

        let protocol = save_content(&mut tx, id, &content).await?;
        tx.commit().await?;
        Ok(protocol)
    }

    pub async fn set_signatures(
        &self,
        user: &AuthUser,
        id: Uuid,
        input: SignaturesInput,
    ) -> Result<Protocol, ServiceError> {
        require(user, Permission::EditRecords)?;
        let manager = input.manager_signature.map(|s| check_signature("manager_signature", s)).transpose()?;
        let client = input.client_signature.map(|s| check_signature("client_signature", s)).transpose()?;

        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        current.status.ensure_editable()?;

        let protocol = sqlx::query_as::<_, Protocol>(
            r#"
            UPDATE protocols
            SET manager_signature = $2, client_signature = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(manager.unwrap_or(current.manager_signature))
        .bind(client.unwrap_or(current.client_signature))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(protocol)
    }

    /// `sent → completed`; after this the protocol is read-only
    pub async fn complete(&self, user: &AuthUser, id: Uuid) -> Result<Protocol, ServiceError> {
        require(user, Permission::CompleteProtocols)?;
        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        let status = current.status.transition(ProtocolStatus::Completed)?;

        let protocol = sqlx::query_as::<_, Protocol>(
            "UPDATE protocols SET status = $2, completed_at = now(), updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("Protocol {} completed by {}", protocol.number, user.id);
        Ok(protocol)
    }

    /// `draft|sent → sent`; only reached through a successful dispatch
    pub async fn mark_sent(&self, id: Uuid, document_url: &str) -> Result<Protocol, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        let status = current.status.transition(ProtocolStatus::Sent)?;

        let protocol = sqlx::query_as::<_, Protocol>(
            r#"
            UPDATE protocols
            SET status = $2, sent_at = now(), document_url = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(document_url)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(protocol)
    }

    /// Completed protocols can only be deleted by an admin
    pub async fn delete_404(&self, user: &AuthUser, id: Uuid) -> Result<Protocol, ServiceError> {
        require(user, Permission::DeleteProtocols)?;
        let mut tx = self.pool.begin().await?;
        let current = lock(&mut tx, id).await?;
        if current.status == ProtocolStatus::Completed && user.role != Role::Admin {
            return Err(WorkflowError::Locked(current.status).into());
        }

        sqlx::query("DELETE FROM protocols WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!("Protocol {} deleted by {}", current.number, user.id);
        Ok(current)
    }
}

fn not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Protocol {} not found", id))
}

async fn lock(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Protocol, ServiceError> {
    sqlx::query_as::<_, Protocol>("SELECT * FROM protocols WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| not_found(id))
}

async fn save_content(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    content: &ProtocolContent,
) -> Result<Protocol, ServiceError> {
    Ok(sqlx::query_as::<_, Protocol>(
        "UPDATE protocols SET content = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(Json(content))
    .fetch_one(&mut **tx)
    .await?)
}

/// Allocates the next protocol number from the settings format.
///
/// Counters are keyed by [`numbering_scope`] and advanced in their own
/// transaction, so skipped values stay skipped even when every attempt hits
/// a number that already exists. A failed insert afterwards leaves a gap.
async fn next_number(pool: &PgPool) -> Result<String, ServiceError> {
    let mut tx = pool.begin().await?;
    let format: Option<String> = sqlx::query_scalar("SELECT numbering_format FROM settings WHERE id = 1")
        .fetch_optional(&mut *tx)
        .await?;
    let format = format.unwrap_or_else(|| DEFAULT_NUMBERING_FORMAT.to_string());
    let today = Utc::now().date_naive();
    let scope = numbering_scope(&format, today);

    for _ in 0..NUMBERING_ATTEMPTS {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO protocol_counters (scope, last_value) VALUES ($1, 1)
            ON CONFLICT (scope) DO UPDATE SET last_value = protocol_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(&scope)
        .fetch_one(&mut *tx)
        .await?;

        let number = format_number(&format, today, seq);
        let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM protocols WHERE number = $1)")
            .bind(&number)
            .fetch_one(&mut *tx)
            .await?;
        if !taken {
            tx.commit().await?;
            return Ok(number);
        }
        tracing::warn!("Protocol number {} already taken, advancing counter", number);
    }

    tx.commit().await?;
    Err(ServiceError::Conflict("Could not allocate a free protocol number".to_string()))
}

/// Empty input clears the signature; anything else must be a decodable image data URL
fn check_signature(field: &'static str, value: String) -> Result<Option<String>, ServiceError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    let (_, bytes) = decode_signature(&value, CONFIG.documents.max_signature_bytes)
        .map_err(|e| ServiceError::validation(field, e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|_| ServiceError::validation(field, "signature image cannot be decoded"))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::io::Cursor;

    fn png_data_url() -> String {
        let img = image::RgbImage::new(4, 2);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    #[test]
    fn blank_signature_clears() {
        assert_eq!(check_signature("client_signature", "  ".into()).unwrap(), None);
    }

    #[test]
    fn valid_png_signature_is_kept() {
        let url = png_data_url();
        assert_eq!(check_signature("client_signature", url.clone()).unwrap(), Some(url));
    }

    #[test]
    fn bad_signatures_are_field_errors() {
        let err = check_signature("manager_signature", "data:text/plain;base64,aGk=".into()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "manager_signature"));

        // valid base64, not an image
        let err = check_signature("client_signature", format!("data:image/png;base64,{}", STANDARD.encode(b"nope")))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[test]
    fn new_protocol_accepts_template_reference() {
        let input: NewProtocol = serde_json::from_value(serde_json::json!({
            "client_id": "0b7f9b4e-9a33-4c1e-8a39-1d8f9fdb5e11",
            "template_id": "5d2ad3f0-1b7c-4c1e-9a6c-0b1f1f2e3d4c",
            "template_kind": "user"
        }))
        .unwrap();
        assert_eq!(input.template_kind, Some(TemplateKind::User));
        assert!(input.content.is_none());
    }

    // Database-backed

    use crate::database::models::template::{TemplateContent, TemplateInput};
    use crate::testing::{self, TestContext};
    use serde_json::json;

    async fn current_format(pool: &PgPool) -> String {
        let format: Option<String> = sqlx::query_scalar("SELECT numbering_format FROM settings WHERE id = 1")
            .fetch_optional(pool)
            .await
            .unwrap();
        format.unwrap_or_else(|| DEFAULT_NUMBERING_FORMAT.to_string())
    }

    #[tokio::test]
    async fn numbering_skips_numbers_already_taken() {
        let Some(ctx) = TestContext::new().await else { return };
        let pool = &ctx.state.pool;
        let client = testing::create_client(&ctx.state, None).await;

        let format = current_format(pool).await;
        let today = Utc::now().date_naive();
        let scope = numbering_scope(&format, today);
        let last: Option<i64> = sqlx::query_scalar("SELECT last_value FROM protocol_counters WHERE scope = $1")
            .bind(&scope)
            .fetch_optional(pool)
            .await
            .unwrap();
        let last = last.unwrap_or(0);

        // numbers the counter has not handed out yet, e.g. imported protocols
        let seeded: Vec<String> = (last + 1..=last + 25).map(|seq| format_number(&format, today, seq)).collect();
        for number in &seeded {
            sqlx::query("INSERT INTO protocols (number, client_id) VALUES ($1, $2) ON CONFLICT (number) DO NOTHING")
                .bind(number)
                .bind(client.id)
                .execute(pool)
                .await
                .unwrap();
        }

        let first = testing::create_protocol(&ctx.state, &client).await;
        let second = testing::create_protocol(&ctx.state, &client).await;
        assert!(!seeded.contains(&first.number), "{} reused", first.number);
        assert!(!seeded.contains(&second.number), "{} reused", second.number);
        assert_ne!(first.number, second.number);

        let counter: i64 = sqlx::query_scalar("SELECT last_value FROM protocol_counters WHERE scope = $1")
            .bind(&scope)
            .fetch_one(pool)
            .await
            .unwrap();
        assert!(counter > last + 25);
    }

    #[tokio::test]
    async fn sent_protocols_stay_editable_until_completed() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, None).await;
        let protocol = testing::create_protocol(&ctx.state, &client).await;
        let manager = testing::user(Role::Manager);
        let service = ctx.state.protocols();

        let sent = service.mark_sent(protocol.id, "http://localhost/storage/doc.pdf").await.unwrap();
        assert_eq!(sent.status, ProtocolStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert_eq!(sent.document_url.as_deref(), Some("http://localhost/storage/doc.pdf"));

        let mut content = sent.content.0.clone();
        content.notes = Some("Poprawka po wysyłce".into());
        let edited = service.update_content(&manager, protocol.id, content.clone()).await.unwrap();
        assert_eq!(edited.content.0.notes.as_deref(), Some("Poprawka po wysyłce"));
        service.reorder_items(&manager, protocol.id, ReorderInput { from: 1, to: 0 }).await.unwrap();

        let completed = service.complete(&manager, protocol.id).await.unwrap();
        assert!(completed.completed_at.is_some());
        let err = service.update_content(&manager, protocol.id, content).await.unwrap_err();
        assert!(matches!(err, ServiceError::Workflow(WorkflowError::Locked(ProtocolStatus::Completed))));
    }

    #[tokio::test]
    async fn draft_protocols_cannot_be_completed() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, None).await;
        let protocol = testing::create_protocol(&ctx.state, &client).await;

        let err = ctx.state.protocols().complete(&testing::user(Role::Manager), protocol.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Workflow(WorkflowError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn template_content_seeds_protocols_only_when_published() {
        let Some(ctx) = TestContext::new().await else { return };
        let admin = testing::user(Role::Admin);
        let manager = testing::user(Role::Manager);
        let client = testing::create_client(&ctx.state, None).await;

        let content: TemplateContent = serde_json::from_value(json!({
            "description": "Odbiór instalacji elektrycznej",
            "items": [{ "description": "Rozdzielnica", "quantity": 1, "unit": "szt." }],
            "warranty_months": 24
        }))
        .unwrap();
        let input = TemplateInput {
            name: Some(format!("Instalacja {}", Uuid::new_v4().simple())),
            category: None,
            content: Some(content.clone()),
        };
        let template = ctx.state.templates().create_one(&admin, TemplateKind::Generic, input).await.unwrap();
        let from_template = NewProtocol {
            client_id: client.id,
            content: None,
            template_id: Some(template.id),
            template_kind: Some(TemplateKind::Generic),
        };

        let err = ctx.state.protocols().create_one(&manager, from_template.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)), "{:?}", err);

        ctx.state
            .templates()
            .set_status(&admin, TemplateKind::Generic, template.id, PublishStatus::Published)
            .await
            .unwrap();
        let protocol = ctx.state.protocols().create_one(&manager, from_template.clone()).await.unwrap();
        assert_eq!(protocol.template_id, Some(template.id));
        assert_eq!(protocol.template_kind, Some(TemplateKind::Generic));
        assert_eq!(protocol.content.0.items, content.items);
        assert_eq!(protocol.content.0.extra["warranty_months"], json!(24));
        assert_eq!(protocol.content.0.extra["description"], json!("Odbiór instalacji elektrycznej"));
        assert_eq!(protocol.content.0.client_name.as_deref(), Some(client.name.as_str()));

        ctx.state.clients().set_status(&admin, client.id, ClientStatus::Inactive).await.unwrap();
        let err = ctx.state.protocols().create_one(&manager, from_template).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn workers_cannot_delete_protocols() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, None).await;
        let protocol = testing::create_protocol(&ctx.state, &client).await;
        let worker = testing::user(Role::Worker);

        let err = ctx.state.protocols().delete_404(&worker, protocol.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)), "{:?}", err);
    }
}
