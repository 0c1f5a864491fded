use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::protocol::{ProtocolContent, ProtocolItem};
use super::text_enum;
use crate::filter::{Column, ColumnKind, TableSpec};

text_enum! {
    /// Which of the two template tables a template lives in
    TemplateKind: "template kind" {
        Generic => "generic",
        User => "user",
    }
}

text_enum! {
    PublishStatus: "template status" {
        Draft => "draft",
        Published => "published",
    }
}

impl TemplateKind {
    pub fn table(&self) -> TableSpec {
        match self {
            TemplateKind::Generic => TEMPLATES,
            TemplateKind::User => USER_TEMPLATES,
        }
    }
}

/// Parsed template `content`; unknown keys are preserved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<Value>,
    #[serde(default)]
    pub items: Vec<ProtocolItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TemplateContent {
    /// The template content copied verbatim as the starting protocol content
    pub fn to_protocol_content(&self) -> Result<ProtocolContent, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub content: Json<TemplateContent>,
    pub is_locked: bool,
    pub status: PublishStatus,
    pub file_path: Option<String>,
    pub preview_path: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PredefinedTemplate {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub content: Json<TemplateContent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TEMPLATE_COLUMNS: &[Column] = &[
    Column::new("id", ColumnKind::Uuid),
    Column::searchable("name"),
    Column::searchable("category"),
    Column::new("status", ColumnKind::Text),
    Column::new("is_locked", ColumnKind::Boolean),
    Column::new("created_by", ColumnKind::Uuid),
    Column::new("created_at", ColumnKind::Timestamp),
    Column::new("updated_at", ColumnKind::Timestamp),
];

pub const TEMPLATES: TableSpec = TableSpec { name: "templates", columns: TEMPLATE_COLUMNS, default_order: "name asc" };

pub const USER_TEMPLATES: TableSpec =
    TableSpec { name: "user_templates", columns: TEMPLATE_COLUMNS, default_order: "name asc" };

pub const PREDEFINED_TEMPLATES: TableSpec = TableSpec {
    name: "predefined_templates",
    columns: &[
        Column::new("id", ColumnKind::Uuid),
        Column::searchable("name"),
        Column::searchable("category"),
        Column::new("created_at", ColumnKind::Timestamp),
    ],
    default_order: "name asc",
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateInput {
    pub name: Option<String>,
    pub category: Option<String>,
    pub content: Option<TemplateContent>,
}
