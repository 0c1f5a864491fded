use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::protocol_service::ProtocolService;
use super::settings_service::SettingsService;
use super::template_service::fetch_template;
use super::{require, ServiceError};
use crate::auth::AuthUser;
use crate::database::models::client::Client;
use crate::database::models::protocol::Protocol;
use crate::database::models::settings::Settings;
use crate::database::models::user::Permission;
use crate::documents::{docx, pdf, DocumentContext, DocumentFormat, RenderedDocument};
use crate::integrations::{Bucket, ObjectStore, StorageError};

/// Protocol, client and settings loaded together for rendering
pub struct DocumentSource {
    pub protocol: Protocol,
    pub client: Client,
    pub settings: Settings,
}

impl DocumentSource {
    pub fn context(&self) -> DocumentContext<'_> {
        DocumentContext::new(&self.protocol, &self.client, &self.settings)
    }
}

pub struct DocumentService {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
}

impl DocumentService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self { pool, store }
    }

    pub async fn load(&self, protocol_id: Uuid) -> Result<DocumentSource, ServiceError> {
        let protocol = ProtocolService::new(self.pool.clone()).select_404(protocol_id).await?;
        let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
            .bind(protocol.client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", protocol.client_id)))?;
        let settings = SettingsService::new(self.pool.clone(), self.store.clone()).select().await?;
        Ok(DocumentSource { protocol, client, settings })
    }

    /// Storage path of the DOCX skeleton for this protocol: its template's
    /// file, else the default template from settings
    pub async fn template_file(&self, source: &DocumentSource) -> Result<Option<String>, ServiceError> {
        if let (Some(id), Some(kind)) = (source.protocol.template_id, source.protocol.template_kind) {
            if let Some(path) = fetch_template(&self.pool, kind, id).await?.and_then(|t| t.file_path) {
                return Ok(Some(path));
            }
        }
        Ok(source.settings.default_template_path.clone())
    }

    pub async fn render(&self, source: &DocumentSource, format: DocumentFormat) -> Result<RenderedDocument, ServiceError> {
        let ctx = source.context();
        let bytes = match format {
            DocumentFormat::Pdf => pdf::render_pdf(&ctx)?,
            DocumentFormat::Docx => {
                let path = self.template_file(source).await?.ok_or_else(|| {
                    ServiceError::Unprocessable("No DOCX template is available for this protocol".to_string())
                })?;
                let template = self.store.get(Bucket::DocumentTemplates, &path).await.map_err(|e| match e {
                    StorageError::NotFound { .. } => {
                        ServiceError::Unprocessable(format!("DOCX template file '{}' is missing from storage", path))
                    }
                    other => other.into(),
                })?;
                docx::fill_docx(&template, &ctx.placeholder_data())?
            }
        };

        tracing::debug!(
            "Rendered {} for protocol {} ({} bytes)",
            format.extension(),
            source.protocol.number,
            bytes.len()
        );
        Ok(RenderedDocument { format, filename: ctx.filename(format), bytes })
    }

    /// `process-document`: render a protocol on demand
    pub async fn process_document(
        &self,
        user: &AuthUser,
        protocol_id: Uuid,
        format: DocumentFormat,
    ) -> Result<RenderedDocument, ServiceError> {
        require(user, Permission::ViewRecords)?;
        let source = self.load(protocol_id).await?;
        self.render(&source, format).await
    }
}
