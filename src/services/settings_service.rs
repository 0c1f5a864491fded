use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;

use super::{merge_optional, require, ServiceError};
use crate::auth::AuthUser;
use crate::database::models::client::is_valid_email;
use crate::database::models::settings::{Settings, SettingsInput};
use crate::database::models::user::Permission;
use crate::documents::{docx, DocumentFormat};
use crate::integrations::{Bucket, ObjectStore};

const MAX_NUMBERING_FORMAT_LEN: usize = 64;
pub const DEFAULT_TEMPLATE_PATH: &str = "default/template.docx";

pub struct SettingsService {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
}

fn logo_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/svg+xml" => Some("svg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn check_numbering_format(format: &str) -> Result<(), ServiceError> {
    if format.trim().is_empty() {
        return Err(ServiceError::validation("numbering_format", "Numbering format cannot be empty"));
    }
    if format.len() > MAX_NUMBERING_FORMAT_LEN {
        return Err(ServiceError::validation(
            "numbering_format",
            format!("Numbering format must be at most {} characters", MAX_NUMBERING_FORMAT_LEN),
        ));
    }
    if format.matches('{').count() != format.matches('}').count() {
        return Err(ServiceError::validation("numbering_format", "Unbalanced braces in numbering format"));
    }
    Ok(())
}

impl SettingsService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self { pool, store }
    }

    /// The singleton row, or defaults when it has never been saved
    pub async fn select(&self) -> Result<Settings, ServiceError> {
        let settings = sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(settings.unwrap_or_default())
    }

    async fn save(&self, settings: &Settings) -> Result<Settings, ServiceError> {
        let saved = sqlx::query_as::<_, Settings>(
            r#"
            INSERT INTO settings (id, company_name, address, tax_id, registration_number, phone, email, website,
                                  logo_url, numbering_format, document_layout, default_template_path, updated_at)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
            ON CONFLICT (id) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                address = EXCLUDED.address,
                tax_id = EXCLUDED.tax_id,
                registration_number = EXCLUDED.registration_number,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email,
                website = EXCLUDED.website,
                logo_url = EXCLUDED.logo_url,
                numbering_format = EXCLUDED.numbering_format,
                document_layout = EXCLUDED.document_layout,
                default_template_path = EXCLUDED.default_template_path,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&settings.company_name)
        .bind(&settings.address)
        .bind(&settings.tax_id)
        .bind(&settings.registration_number)
        .bind(&settings.phone)
        .bind(&settings.email)
        .bind(&settings.website)
        .bind(&settings.logo_url)
        .bind(&settings.numbering_format)
        .bind(&settings.document_layout)
        .bind(&settings.default_template_path)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    pub async fn update(&self, user: &AuthUser, input: SettingsInput) -> Result<Settings, ServiceError> {
        require(user, Permission::ManageSettings)?;
        let current = self.select().await?;

        let numbering_format = match input.numbering_format {
            Some(format) => {
                let format = format.trim().to_string();
                check_numbering_format(&format)?;
                format
            }
            None => current.numbering_format,
        };
        let email = merge_optional(current.email, input.email);
        if let Some(email) = email.as_deref().filter(|e| !is_valid_email(e)) {
            return Err(ServiceError::validation("email", format!("Invalid e-mail address '{}'", email)));
        }

        let updated = Settings {
            company_name: merge_optional(current.company_name, input.company_name),
            address: merge_optional(current.address, input.address),
            tax_id: merge_optional(current.tax_id, input.tax_id),
            registration_number: merge_optional(current.registration_number, input.registration_number),
            phone: merge_optional(current.phone, input.phone),
            email,
            website: merge_optional(current.website, input.website),
            numbering_format,
            document_layout: input.document_layout.map(Json).unwrap_or(current.document_layout),
            ..current
        };

        let saved = self.save(&updated).await?;
        tracing::info!("Settings updated by {}", user.id);
        Ok(saved)
    }

    /// Stores a new company logo and points `logo_url` at it
    pub async fn upload_logo(&self, user: &AuthUser, bytes: Vec<u8>, content_type: &str) -> Result<Settings, ServiceError> {
        require(user, Permission::ManageSettings)?;
        let extension = logo_extension(content_type)
            .ok_or_else(|| ServiceError::validation("file", "Logo must be a PNG, JPEG, SVG or WebP image"))?;
        if bytes.is_empty() {
            return Err(ServiceError::validation("file", "File is empty"));
        }

        // new name per upload; public logo URLs are cached
        let path = format!("logo-{}.{}", Utc::now().timestamp_millis(), extension);
        self.store.put(Bucket::CompanyLogos, &path, bytes, content_type).await?;

        let current = self.select().await?;
        let updated = Settings { logo_url: Some(self.store.public_url(Bucket::CompanyLogos, &path)), ..current };
        self.save(&updated).await
    }

    /// Stores the DOCX used when a protocol has no template file of its own
    pub async fn upload_default_template(&self, user: &AuthUser, bytes: Vec<u8>) -> Result<Settings, ServiceError> {
        require(user, Permission::ManageSettings)?;
        docx::validate_template(&bytes)?;
        self.store
            .put(Bucket::DocumentTemplates, DEFAULT_TEMPLATE_PATH, bytes, DocumentFormat::Docx.content_type())
            .await?;

        let current = self.select().await?;
        let updated = Settings { default_template_path: Some(DEFAULT_TEMPLATE_PATH.to_string()), ..current };
        self.save(&updated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_format_rules() {
        assert!(check_numbering_format("PROT/{YYYY}/{NNNN}").is_ok());
        assert!(check_numbering_format("  ").is_err());
        assert!(check_numbering_format("PROT/{YYYY/{NNNN}").is_err());
        assert!(check_numbering_format(&"N".repeat(65)).is_err());
    }

    #[test]
    fn logo_types() {
        assert_eq!(logo_extension("image/svg+xml"), Some("svg"));
        assert_eq!(logo_extension("image/gif"), None);
    }
}
