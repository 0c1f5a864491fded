// services/mod.rs - Typed business operations behind the HTTP handlers
//
// Every service owns clones of the shared handles it needs (pool, object
// store, mailer) and checks the caller's permission before touching data.

pub mod client_service;
pub mod dispatch_service;
pub mod document_service;
pub mod protocol_service;
pub mod settings_service;
pub mod template_service;
pub mod user_service;

pub use client_service::ClientService;
pub use dispatch_service::DispatchService;
pub use document_service::DocumentService;
pub use protocol_service::ProtocolService;
pub use settings_service::SettingsService;
pub use template_service::TemplateService;
pub use user_service::UserService;

use thiserror::Error;

use crate::auth::AuthUser;
use crate::database::models::protocol::WorkflowError;
use crate::database::models::user::Permission;
use crate::database::DatabaseError;
use crate::documents::DocumentError;
use crate::integrations::{MailError, StorageError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(err.into())
    }
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation { field: field.into(), message: message.into() }
    }
}

/// Fails with `Forbidden` unless the caller's role grants `permission`
pub fn require(user: &AuthUser, permission: Permission) -> Result<(), ServiceError> {
    if user.role.can(permission) {
        Ok(())
    } else {
        tracing::debug!("User {} ({}) denied {:?}", user.id, user.role, permission);
        Err(ServiceError::Forbidden(format!("Role '{}' is not allowed to perform this action", user.role)))
    }
}

/// Applies a partial-update field: absent keeps `current`, blank clears it
pub fn merge_optional(current: Option<String>, patch: Option<String>) -> Option<String> {
    match patch {
        None => current,
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}
