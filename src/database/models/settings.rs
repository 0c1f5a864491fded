use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;

pub const DEFAULT_NUMBERING_FORMAT: &str = "PROT/{YYYY}/{NNNN}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoPosition {
    #[default]
    Left,
    Center,
    Right,
}

/// Header / body / footer configuration for generated documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentLayout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default)]
    pub logo_position: LogoPosition,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Singleton company profile (`settings.id = 1`)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settings {
    pub company_name: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub numbering_format: String,
    pub document_layout: Json<DocumentLayout>,
    pub default_template_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            company_name: None,
            address: None,
            tax_id: None,
            registration_number: None,
            phone: None,
            email: None,
            website: None,
            logo_url: None,
            numbering_format: DEFAULT_NUMBERING_FORMAT.to_string(),
            document_layout: Json(DocumentLayout::default()),
            default_template_path: None,
            updated_at: Utc::now(),
        }
    }
}

impl Settings {
    /// Issuer lines printed at the top of generated documents
    pub fn issuer_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(name) = &self.company_name {
            lines.push(name.clone());
        }
        if let Some(address) = &self.address {
            lines.extend(address.lines().map(str::to_string));
        }
        let ids: Vec<String> = [("Tax ID", &self.tax_id), ("Reg. No.", &self.registration_number)]
            .into_iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
            .collect();
        if !ids.is_empty() {
            lines.push(ids.join("   "));
        }
        let contact: Vec<&str> = [&self.phone, &self.email, &self.website]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .collect();
        if !contact.is_empty() {
            lines.push(contact.join("   "));
        }
        lines
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsInput {
    pub company_name: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub numbering_format: Option<String>,
    pub document_layout: Option<DocumentLayout>,
}
