use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::integrations::{mailer, storage, Mailer, ObjectStore};
use crate::services::{
    ClientService, DispatchService, DocumentService, ProtocolService, SettingsService, TemplateService, UserService,
};

/// Shared handles passed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn ObjectStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { pool, store, mailer }
    }

    pub fn from_config(pool: PgPool, config: &AppConfig) -> Self {
        Self::new(pool, storage::from_config(&config.storage), mailer::from_config(&config.email))
    }

    pub fn clients(&self) -> ClientService {
        ClientService::new(self.pool.clone())
    }

    pub fn protocols(&self) -> ProtocolService {
        ProtocolService::new(self.pool.clone())
    }

    pub fn templates(&self) -> TemplateService {
        TemplateService::new(self.pool.clone(), self.store.clone())
    }

    pub fn settings(&self) -> SettingsService {
        SettingsService::new(self.pool.clone(), self.store.clone())
    }

    pub fn users(&self) -> UserService {
        UserService::new(self.pool.clone())
    }

    pub fn documents(&self) -> DocumentService {
        DocumentService::new(self.pool.clone(), self.store.clone())
    }

    pub fn dispatch(&self) -> DispatchService {
        DispatchService::new(self.pool.clone(), self.store.clone(), self.mailer.clone())
    }
}
