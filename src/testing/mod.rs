//! Helpers for database-backed unit tests.
//!
//! Tests that need PostgreSQL call [`TestContext::new`] and return early when
//! `HANDOVER_TEST_DATABASE_URL` is not set.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::config::config;
use crate::database::models::client::{Client, ClientInput};
use crate::database::models::protocol::{Protocol, ProtocolContent};
use crate::database::models::user::Role;
use crate::database::DatabaseManager;
use crate::integrations::storage::LocalStorage;
use crate::integrations::{MailError, Mailer, OutgoingEmail};
use crate::services::protocol_service::NewProtocol;
use crate::state::AppState;

pub const TEST_DATABASE_ENV: &str = "HANDOVER_TEST_DATABASE_URL";

/// Keeps every message instead of delivering it
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let mut sent = self.sent.lock().expect("mailer mutex poisoned");
        sent.push(email.clone());
        Ok(format!("test-{}", sent.len()))
    }
}

/// Rejects every message
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<String, MailError> {
        Err(MailError::Rejected { status: 422, body: "recipient refused".to_string() })
    }
}

pub struct TestContext {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    _storage_dir: tempfile::TempDir,
}

impl TestContext {
    /// `None` when no test database is configured
    pub async fn new() -> Option<Self> {
        let mailer = Arc::new(RecordingMailer::default());
        Self::with_mailer(mailer.clone()).await.map(|(state, dir)| Self { state, mailer, _storage_dir: dir })
    }

    /// Same database, but every e-mail fails
    pub async fn failing_mail() -> Option<(AppState, tempfile::TempDir)> {
        Self::with_mailer(Arc::new(FailingMailer)).await
    }

    async fn with_mailer(mailer: Arc<dyn Mailer>) -> Option<(AppState, tempfile::TempDir)> {
        let url = std::env::var(TEST_DATABASE_ENV).ok()?;
        let pool = DatabaseManager::connect_url(&url, &config().database).expect("test database url");
        DatabaseManager::migrate(&pool).await.expect("migrations");

        let dir = tempfile::tempdir().expect("storage dir");
        let store = Arc::new(LocalStorage::new(dir.path(), "http://localhost/storage"));
        Some((AppState::new(pool, store, mailer), dir))
    }
}

pub fn user(role: Role) -> AuthUser {
    AuthUser { id: Uuid::new_v4(), email: Some(format!("{}@example.com", role)), role }
}

pub async fn create_client(state: &AppState, email: Option<&str>) -> Client {
    let input = ClientInput {
        name: Some(format!("Client {}", Uuid::new_v4().simple())),
        email: email.map(str::to_string),
        ..Default::default()
    };
    state.clients().create_one(&user(Role::Admin), input).await.expect("create client")
}

pub async fn create_protocol(state: &AppState, client: &Client) -> Protocol {
    let content: ProtocolContent = serde_json::from_value(json!({
        "project_name": "Biuro Kraków",
        "items": [
            { "description": "Laptop", "quantity": 1, "unit": "szt." },
            { "description": "Monitor", "quantity": 2, "unit": "szt." }
        ]
    }))
    .expect("protocol content");
    let input = NewProtocol { client_id: client.id, content: Some(content), template_id: None, template_kind: None };
    state.protocols().create_one(&user(Role::Manager), input).await.expect("create protocol")
}
