//! Protocol document generation: placeholder templates, DOCX filling and PDF rendering.

pub mod docx;
pub mod pdf;
pub mod placeholder;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::database::models::client::Client;
use crate::database::models::protocol::Protocol;
use crate::database::models::settings::Settings;
use placeholder::TemplateError;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{0}")]
    InvalidPackage(String),

    #[error("{0}")]
    InvalidImage(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(err: zip::result::ZipError) -> Self {
        DocumentError::InvalidPackage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }
}

/// A generated document ready to download, upload or attach
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub format: DocumentFormat,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Everything a protocol document is rendered from
pub struct DocumentContext<'a> {
    pub protocol: &'a Protocol,
    pub client: &'a Client,
    pub settings: &'a Settings,
    pub generated_at: DateTime<Utc>,
}

impl<'a> DocumentContext<'a> {
    pub fn new(protocol: &'a Protocol, client: &'a Client, settings: &'a Settings) -> Self {
        Self { protocol, client, settings, generated_at: Utc::now() }
    }

    /// `PROT/2024/0001` becomes `PROT-2024-0001.pdf`
    pub fn filename(&self, format: DocumentFormat) -> String {
        let stem: String = self
            .protocol
            .number
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("{}.{}", stem, format.extension())
    }

    pub fn date(&self) -> String {
        self.protocol.sent_at.unwrap_or(self.generated_at).format("%d.%m.%Y").to_string()
    }

    /// Placeholder data: protocol content keys at the top level plus
    /// `number`, `date`, `items` (with 1-based `index`), `client` and `company`.
    pub fn placeholder_data(&self) -> Value {
        let content = &self.protocol.content.0;
        let mut data: Map<String, Value> = content.extra.clone();

        let items: Vec<Value> = content
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut value = serde_json::to_value(item).unwrap_or_else(|_| json!({}));
                if let Value::Object(obj) = &mut value {
                    obj.insert("index".into(), json!(i + 1));
                    obj.insert("quantity".into(), json!(item.quantity.normalize().to_string()));
                }
                value
            })
            .collect();

        let client_name = content.client_name.clone().unwrap_or_else(|| self.client.name.clone());
        let company_name = content.company_name.clone().or_else(|| self.client.company_name.clone());

        data.insert("number".into(), json!(self.protocol.number));
        data.insert("date".into(), json!(self.date()));
        data.insert("status".into(), json!(self.protocol.status.as_str()));
        data.insert("client_name".into(), json!(client_name));
        data.insert("company_name".into(), json!(company_name));
        data.insert("project_name".into(), json!(content.project_name));
        data.insert("notes".into(), json!(content.notes));
        data.insert("items".into(), Value::Array(items));
        data.insert(
            "client".into(),
            json!({
                "name": self.client.name,
                "email": self.client.email,
                "phone": self.client.phone,
                "address": self.client.address,
                "company_name": self.client.company_name,
                "tax_id": self.client.tax_id,
                "registration_number": self.client.registration_number,
            }),
        );
        data.insert(
            "company".into(),
            json!({
                "name": self.settings.company_name,
                "address": self.settings.address,
                "tax_id": self.settings.tax_id,
                "registration_number": self.settings.registration_number,
                "phone": self.settings.phone,
                "email": self.settings.email,
                "website": self.settings.website,
            }),
        );
        data.insert("has_manager_signature".into(), json!(self.protocol.manager_signature.is_some()));
        data.insert("has_client_signature".into(), json!(self.protocol.client_signature.is_some()));
        Value::Object(data)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_data_merges_client_and_content() {
        let client = fixtures::client();
        let protocol = fixtures::protocol(2);
        let settings = Settings { company_name: Some("Serwis".into()), ..Default::default() };
        let ctx = DocumentContext::new(&protocol, &client, &settings);
        let data = ctx.placeholder_data();

        assert_eq!(data["number"], "PROT/2024/0007");
        assert_eq!(data["client_name"], "Jan Kowalski");
        assert_eq!(data["company_name"], "Kowalski Sp. z o.o.");
        assert_eq!(data["items"][1]["index"], 2);
        assert_eq!(data["items"][0]["quantity"], "1.5");
        assert_eq!(data["company"]["name"], "Serwis");
        assert_eq!(ctx.filename(DocumentFormat::Pdf), "PROT-2024-0007.pdf");
    }
}
