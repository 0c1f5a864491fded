use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::{require, ServiceError};
use crate::auth::AuthUser;
use crate::database::models::template::{
    PredefinedTemplate, PublishStatus, Template, TemplateInput, TemplateKind, PREDEFINED_TEMPLATES,
};
use crate::database::models::user::{Permission, Role};
use crate::database::{DatabaseError, Repository};
use crate::documents::docx;
use crate::filter::FilterData;
use crate::integrations::storage::content_type_for;
use crate::integrations::{Bucket, ObjectStore, StorageError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyPredefined {
    pub name: Option<String>,
}

pub struct TemplateService {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
}

/// Loads a template row of either kind
pub(crate) async fn fetch_template(pool: &PgPool, kind: TemplateKind, id: Uuid) -> Result<Option<Template>, ServiceError> {
    let sql = format!("SELECT * FROM {} WHERE id = $1", kind.table().name);
    Ok(sqlx::query_as::<_, Template>(&sql).bind(id).fetch_optional(pool).await?)
}

/// User templates belong to their creator; admins see every one
pub(crate) fn ensure_visible(user: &AuthUser, kind: TemplateKind, template: &Template) -> Result<(), ServiceError> {
    match kind {
        TemplateKind::User if user.role != Role::Admin && template.created_by != Some(user.id) => {
            Err(ServiceError::NotFound(format!("Template {} not found", template.id)))
        }
        _ => Ok(()),
    }
}

fn manage_permission(kind: TemplateKind) -> Permission {
    match kind {
        TemplateKind::Generic => Permission::ManageGenericTemplates,
        TemplateKind::User => Permission::ManageUserTemplates,
    }
}

fn unique_name_conflict(err: ServiceError, name: &str) -> ServiceError {
    match err {
        ServiceError::Database(DatabaseError::UniqueViolation(_)) => {
            ServiceError::Conflict(format!("A template named '{}' already exists", name))
        }
        other => other,
    }
}

fn preview_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

impl TemplateService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self { pool, store }
    }

    pub async fn select_any(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        filter: FilterData,
    ) -> Result<Vec<Template>, ServiceError> {
        let filter = match kind {
            TemplateKind::User if user.role != Role::Admin => filter.and_eq("created_by", serde_json::json!(user.id)),
            _ => filter,
        };
        Ok(Repository::<Template>::new(kind.table(), self.pool.clone()).select_any(filter).await?)
    }

    pub async fn select_404(&self, user: &AuthUser, kind: TemplateKind, id: Uuid) -> Result<Template, ServiceError> {
        let template = fetch_template(&self.pool, kind, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Template {} not found", id)))?;
        ensure_visible(user, kind, &template)?;
        Ok(template)
    }

    /// Loads a template the caller may manage and that is not locked
    async fn select_editable(&self, user: &AuthUser, kind: TemplateKind, id: Uuid) -> Result<Template, ServiceError> {
        require(user, manage_permission(kind))?;
        let template = self.select_404(user, kind, id).await?;
        if template.is_locked {
            return Err(ServiceError::Conflict(format!("Template '{}' is locked", template.name)));
        }
        Ok(template)
    }

    pub async fn create_one(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        input: TemplateInput,
    ) -> Result<Template, ServiceError> {
        require(user, manage_permission(kind))?;
        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ServiceError::validation("name", "Name is required"))?;

        let sql = format!(
            "INSERT INTO {} (name, category, content, created_by) VALUES ($1, $2, $3, $4) RETURNING *",
            kind.table().name
        );
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(&name)
            .bind(input.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()))
            .bind(Json(input.content.unwrap_or_default()))
            .bind(user.id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unique_name_conflict(e.into(), &name))?;

        tracing::info!("Created {} template '{}' ({})", kind, template.name, template.id);
        Ok(template)
    }

    pub async fn update_404(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        id: Uuid,
        input: TemplateInput,
    ) -> Result<Template, ServiceError> {
        let current = self.select_editable(user, kind, id).await?;
        let name = match input.name {
            Some(name) if name.trim().is_empty() => return Err(ServiceError::validation("name", "Name cannot be empty")),
            Some(name) => name.trim().to_string(),
            None => current.name,
        };
        let category = super::merge_optional(current.category, input.category);
        let content = input.content.unwrap_or(current.content.0);

        let sql = format!(
            "UPDATE {} SET name = $2, category = $3, content = $4, updated_at = now() WHERE id = $1 RETURNING *",
            kind.table().name
        );
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .bind(&name)
            .bind(category)
            .bind(Json(content))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unique_name_conflict(e.into(), &name))?;
        Ok(template)
    }

    pub async fn set_locked(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        id: Uuid,
        locked: bool,
    ) -> Result<Template, ServiceError> {
        require(user, manage_permission(kind))?;
        self.select_404(user, kind, id).await?;
        let sql = format!(
            "UPDATE {} SET is_locked = $2, updated_at = now() WHERE id = $1 RETURNING *",
            kind.table().name
        );
        let template = sqlx::query_as::<_, Template>(&sql).bind(id).bind(locked).fetch_one(&self.pool).await?;
        tracing::info!("Template {} {}", id, if locked { "locked" } else { "unlocked" });
        Ok(template)
    }

    /// Publish or unpublish; only published templates can seed protocols
    pub async fn set_status(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Template, ServiceError> {
        require(user, manage_permission(kind))?;
        self.select_404(user, kind, id).await?;
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
            kind.table().name
        );
        Ok(sqlx::query_as::<_, Template>(&sql).bind(id).bind(status).fetch_one(&self.pool).await?)
    }

    /// Stores the DOCX skeleton used by `process-document` and dispatch
    pub async fn upload_file(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        id: Uuid,
        bytes: Vec<u8>,
    ) -> Result<Template, ServiceError> {
        self.select_editable(user, kind, id).await?;
        if bytes.is_empty() {
            return Err(ServiceError::validation("file", "File is empty"));
        }
        docx::validate_template(&bytes)?;

        let path = format!("{}/{}/template.docx", kind, id);
        self.store
            .put(Bucket::DocumentTemplates, &path, bytes, crate::documents::DocumentFormat::Docx.content_type())
            .await?;

        let sql = format!(
            "UPDATE {} SET file_path = $2, updated_at = now() WHERE id = $1 RETURNING *",
            kind.table().name
        );
        Ok(sqlx::query_as::<_, Template>(&sql).bind(id).bind(&path).fetch_one(&self.pool).await?)
    }

    pub async fn upload_preview(
        &self,
        user: &AuthUser,
        kind: TemplateKind,
        id: Uuid,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Template, ServiceError> {
        let current = self.select_editable(user, kind, id).await?;
        let extension = preview_extension(content_type)
            .ok_or_else(|| ServiceError::validation("file", "Preview must be a PNG, JPEG or WebP image"))?;
        if bytes.is_empty() {
            return Err(ServiceError::validation("file", "File is empty"));
        }

        let path = format!("{}/{}/preview.{}", kind, id, extension);
        self.store.put(Bucket::TemplatePreviews, &path, bytes, content_type).await?;

        let sql = format!(
            "UPDATE {} SET preview_path = $2, updated_at = now() WHERE id = $1 RETURNING *",
            kind.table().name
        );
        let template = sqlx::query_as::<_, Template>(&sql).bind(id).bind(&path).fetch_one(&self.pool).await?;

        if let Some(old) = current.preview_path.filter(|old| *old != path) {
            if let Err(e) = self.store.delete(Bucket::TemplatePreviews, &old).await {
                tracing::warn!("Failed to remove replaced preview {}: {}", old, e);
            }
        }
        Ok(template)
    }

    /// Removes the row and its stored objects together. Objects are read
    /// before anything is deleted; when a removal fails the ones already
    /// removed are written back and the row delete is rolled back.
    pub async fn delete_404(&self, user: &AuthUser, kind: TemplateKind, id: Uuid) -> Result<Template, ServiceError> {
        require(user, manage_permission(kind))?;

        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT * FROM {} WHERE id = $1 FOR UPDATE", kind.table().name);
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Template {} not found", id)))?;
        ensure_visible(user, kind, &template)?;
        if template.is_locked {
            return Err(ServiceError::Conflict(format!("Template '{}' is locked", template.name)));
        }

        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table().name);
        sqlx::query(&sql).bind(id).execute(&mut *tx).await?;

        let objects = [
            (Bucket::DocumentTemplates, template.file_path.as_deref()),
            (Bucket::TemplatePreviews, template.preview_path.as_deref()),
        ];
        let snapshots = objects
            .into_iter()
            .filter_map(|(bucket, path)| path.map(|path| self.snapshot(bucket, path)));
        let snapshots = match futures::future::try_join_all(snapshots).await {
            Ok(found) => found.into_iter().flatten().collect::<Vec<_>>(),
            Err(e) => {
                tracing::error!("Template {} kept: reading its objects failed: {}", id, e);
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        for (index, (bucket, path, _)) in snapshots.iter().enumerate() {
            if let Err(e) = self.store.delete(*bucket, path).await {
                tracing::error!("Template {} kept: removing {}/{} failed: {}", id, bucket, path, e);
                self.restore(&snapshots[..index]).await;
                tx.rollback().await?;
                return Err(e.into());
            }
        }

        tx.commit().await?;
        tracing::info!("Deleted {} template '{}' ({})", kind, template.name, id);
        Ok(template)
    }

    /// Current bytes of an object; `None` when it is already gone
    async fn snapshot(&self, bucket: Bucket, path: &str) -> Result<Option<(Bucket, String, Vec<u8>)>, StorageError> {
        match self.store.get(bucket, path).await {
            Ok(bytes) => Ok(Some((bucket, path.to_string(), bytes))),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn restore(&self, removed: &[(Bucket, String, Vec<u8>)]) {
        for (bucket, path, bytes) in removed {
            if let Err(e) = self.store.put(*bucket, path, bytes.clone(), content_type_for(path)).await {
                tracing::error!("Could not restore {}/{}: {}", bucket, path, e);
            }
        }
    }

    pub async fn select_predefined(&self, filter: FilterData) -> Result<Vec<PredefinedTemplate>, ServiceError> {
        Ok(Repository::<PredefinedTemplate>::new(PREDEFINED_TEMPLATES, self.pool.clone())
            .select_any(filter)
            .await?)
    }

    /// Copies a library template into the caller's user templates
    pub async fn copy_predefined(
        &self,
        user: &AuthUser,
        id: Uuid,
        input: CopyPredefined,
    ) -> Result<Template, ServiceError> {
        require(user, Permission::ManageUserTemplates)?;
        let source = sqlx::query_as::<_, PredefinedTemplate>("SELECT * FROM predefined_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Predefined template {} not found", id)))?;

        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| source.name.clone());

        let template = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO user_templates (name, category, content, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&source.category)
        .bind(&source.content)
        .bind(user.id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_name_conflict(e.into(), &name))?;

        tracing::info!("Copied predefined template '{}' to {} for {}", source.name, template.id, user.id);
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(created_by: Option<Uuid>) -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "Odbiór instalacji".into(),
            category: None,
            content: Json(Default::default()),
            is_locked: false,
            status: PublishStatus::Draft,
            file_path: None,
            preview_path: None,
            created_by,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(role: Role) -> AuthUser {
        AuthUser { id: Uuid::new_v4(), email: None, role }
    }

    #[test]
    fn user_templates_are_private_to_owner_and_admin() {
        let owner = user(Role::Manager);
        let other = user(Role::Manager);
        let admin = user(Role::Admin);
        let t = template(Some(owner.id));

        assert!(ensure_visible(&owner, TemplateKind::User, &t).is_ok());
        assert!(matches!(ensure_visible(&other, TemplateKind::User, &t), Err(ServiceError::NotFound(_))));
        assert!(ensure_visible(&admin, TemplateKind::User, &t).is_ok());
        // generic templates are shared
        assert!(ensure_visible(&other, TemplateKind::Generic, &t).is_ok());
    }

    #[test]
    fn unique_violations_become_named_conflicts() {
        let err = unique_name_conflict(DatabaseError::UniqueViolation("templates_name_key".into()).into(), "Odbiór");
        assert!(matches!(err, ServiceError::Conflict(ref m) if m.contains("Odbiór")));
        let err = unique_name_conflict(ServiceError::NotFound("x".into()), "Odbiór");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn manage_permission_depends_on_kind() {
        assert_eq!(manage_permission(TemplateKind::Generic), Permission::ManageGenericTemplates);
        assert_eq!(manage_permission(TemplateKind::User), Permission::ManageUserTemplates);
        assert_eq!(preview_extension("image/jpeg"), Some("jpg"));
        assert_eq!(preview_extension("application/pdf"), None);
    }

    // Database-backed

    use crate::integrations::storage::LocalStorage;
    use crate::testing::TestContext;
    use async_trait::async_trait;

    /// Local store whose preview bucket refuses deletes
    struct StickyPreviews(LocalStorage);

    #[async_trait]
    impl ObjectStore for StickyPreviews {
        async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
            self.0.put(bucket, path, bytes, content_type).await
        }

        async fn get(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, StorageError> {
            self.0.get(bucket, path).await
        }

        async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), StorageError> {
            match bucket {
                Bucket::TemplatePreviews => Err(StorageError::Rejected { status: 500, body: "busy".into() }),
                _ => self.0.delete(bucket, path).await,
            }
        }

        fn public_url(&self, bucket: Bucket, path: &str) -> String {
            self.0.public_url(bucket, path)
        }
    }

    /// Generic template with both a DOCX and a preview stored
    async fn stored_template(service: &TemplateService, store: &dyn ObjectStore, pool: &PgPool) -> Template {
        let admin = user(Role::Admin);
        let input = TemplateInput { name: Some(format!("Odbiór {}", Uuid::new_v4().simple())), ..Default::default() };
        let template = service.create_one(&admin, TemplateKind::Generic, input).await.unwrap();

        let file = format!("generic/{}/template.docx", template.id);
        let preview = format!("generic/{}/preview.png", template.id);
        store.put(Bucket::DocumentTemplates, &file, b"PK docx".to_vec(), "application/octet-stream").await.unwrap();
        store.put(Bucket::TemplatePreviews, &preview, b"png".to_vec(), "image/png").await.unwrap();
        sqlx::query_as::<_, Template>(
            "UPDATE templates SET file_path = $2, preview_path = $3 WHERE id = $1 RETURNING *",
        )
        .bind(template.id)
        .bind(&file)
        .bind(&preview)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn row_exists(pool: &PgPool, id: Uuid) -> bool {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM templates WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delete_removes_row_and_objects() {
        let Some(ctx) = TestContext::new().await else { return };
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path(), "http://localhost/storage"));
        let service = TemplateService::new(ctx.state.pool.clone(), store.clone());
        let template = stored_template(&service, store.as_ref(), &ctx.state.pool).await;

        service.delete_404(&user(Role::Admin), TemplateKind::Generic, template.id).await.unwrap();

        assert!(!row_exists(&ctx.state.pool, template.id).await);
        let file = template.file_path.as_deref().unwrap();
        assert!(matches!(
            store.get(Bucket::DocumentTemplates, file).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_removal_puts_earlier_objects_back() {
        let Some(ctx) = TestContext::new().await else { return };
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StickyPreviews(LocalStorage::new(dir.path(), "http://localhost/storage")));
        let service = TemplateService::new(ctx.state.pool.clone(), store.clone());
        let template = stored_template(&service, store.as_ref(), &ctx.state.pool).await;

        let err = service.delete_404(&user(Role::Admin), TemplateKind::Generic, template.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)), "{:?}", err);

        assert!(row_exists(&ctx.state.pool, template.id).await);
        let file = template.file_path.as_deref().unwrap();
        assert_eq!(store.get(Bucket::DocumentTemplates, file).await.unwrap(), b"PK docx");
        let preview = template.preview_path.as_deref().unwrap();
        assert_eq!(store.get(Bucket::TemplatePreviews, preview).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn unreadable_object_aborts_before_anything_is_removed() {
        let Some(ctx) = TestContext::new().await else { return };
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path(), "http://localhost/storage"));
        let service = TemplateService::new(ctx.state.pool.clone(), store.clone());
        let template = stored_template(&service, store.as_ref(), &ctx.state.pool).await;

        // a directory where the preview file should be cannot be read
        let preview = template.preview_path.as_deref().unwrap();
        let on_disk = dir.path().join(Bucket::TemplatePreviews.as_str()).join(preview);
        std::fs::remove_file(&on_disk).unwrap();
        std::fs::create_dir_all(&on_disk).unwrap();

        assert!(service.delete_404(&user(Role::Admin), TemplateKind::Generic, template.id).await.is_err());
        assert!(row_exists(&ctx.state.pool, template.id).await);
        let file = template.file_path.as_deref().unwrap();
        assert_eq!(store.get(Bucket::DocumentTemplates, file).await.unwrap(), b"PK docx");
    }

    #[tokio::test]
    async fn locked_templates_are_not_deleted() {
        let Some(ctx) = TestContext::new().await else { return };
        let service = ctx.state.templates();
        let admin = user(Role::Admin);
        let input = TemplateInput { name: Some(format!("Zablokowany {}", Uuid::new_v4().simple())), ..Default::default() };
        let template = service.create_one(&admin, TemplateKind::Generic, input).await.unwrap();
        service.set_locked(&admin, TemplateKind::Generic, template.id, true).await.unwrap();

        let err = service.delete_404(&admin, TemplateKind::Generic, template.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(row_exists(&ctx.state.pool, template.id).await);
    }
}
