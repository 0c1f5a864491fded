//! Object storage for logos, template files, previews and generated documents.
//!
//! Two backends:
//!
//! - **Supabase Storage** (REST, service-role key) for deployed environments.
//! - **Local disk** under `STORAGE_LOCAL_ROOT` for development and tests.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    CompanyLogos,
    DocumentTemplates,
    ProcessedDocuments,
    TemplatePreviews,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::CompanyLogos => "company-logos",
            Bucket::DocumentTemplates => "document-templates",
            Bucket::ProcessedDocuments => "processed-documents",
            Bucket::TemplatePreviews => "template-previews",
        }
    }
}

impl std::str::FromStr for Bucket {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "company-logos" => Ok(Bucket::CompanyLogos),
            "document-templates" => Ok(Bucket::DocumentTemplates),
            "processed-documents" => Ok(Bucket::ProcessedDocuments),
            "template-previews" => Ok(Bucket::TemplatePreviews),
            other => Err(StorageError::InvalidPath(format!("unknown bucket '{}'", other))),
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {path} not found in {bucket}")]
    NotFound { bucket: &'static str, path: String },

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("storage request failed with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Minimal object store contract used by the services
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting a missing object succeeds
    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), StorageError>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// Rejects empty, absolute and parent-relative object paths
pub fn validate_path(path: &str) -> Result<&str, StorageError> {
    let trimmed = path.trim_matches('/');
    let valid = !trimmed.is_empty()
        && !path.contains('\\')
        && Path::new(trimmed).components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(trimmed)
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

/// Content type implied by an object's extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Builds the configured backend
pub fn from_config(config: &StorageConfig) -> std::sync::Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackend::Supabase => std::sync::Arc::new(SupabaseStorage::new(config)),
        StorageBackend::Local => std::sync::Arc::new(LocalStorage::new(&config.local_root, &config.public_base_url)),
    }
}

pub struct SupabaseStorage {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl SupabaseStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    async fn check(response: reqwest::Response, bucket: Bucket, path: &str) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Storage reports missing objects as 400 with a "not_found" body on some versions
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND || body.contains("not_found") || body.contains("Object not found") {
            return Err(StorageError::NotFound { bucket: bucket.as_str(), path: path.to_string() });
        }
        Err(StorageError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        let response = self
            .client
            .post(self.object_url(bucket, path))
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        Self::check(response, bucket, path).await?;
        tracing::debug!("Uploaded {}/{}", bucket, path);
        Ok(())
    }

    async fn get(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, StorageError> {
        let path = validate_path(path)?;
        let response = self.client.get(self.object_url(bucket, path)).bearer_auth(&self.service_key).send().await?;
        let response = Self::check(response, bucket, path).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        let response = self
            .client
            .delete(format!("{}/storage/v1/object/{}", self.base_url, bucket))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "prefixes": [path] }))
            .send()
            .await?;
        match Self::check(response, bucket, path).await {
            Ok(_) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path.trim_matches('/'))
    }
}

/// Stores objects as files under `<root>/<bucket>/<path>`
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self { root: root.into(), public_base_url: public_base_url.trim_end_matches('/').to_string() }
    }

    fn file_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(bucket.as_str()).join(validate_path(path)?))
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let file = self.file_path(bucket, path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, bytes).await?;
        Ok(())
    }

    async fn get(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, StorageError> {
        let file = self.file_path(bucket, path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { bucket: bucket.as_str(), path: path.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), StorageError> {
        let file = self.file_path(bucket, path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, path.trim_matches('/'))
    }
}
