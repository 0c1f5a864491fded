use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::template::TemplateKind;
use super::text_enum;
use crate::filter::{Column, ColumnKind, TableSpec};

text_enum! {
    ProtocolStatus: "protocol status" {
        Draft => "draft",
        Sent => "sent",
        Completed => "completed",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Protocol is {0} and can no longer be modified")]
    Locked(ProtocolStatus),

    #[error("Protocol cannot move from {from} to {to}")]
    InvalidTransition { from: ProtocolStatus, to: ProtocolStatus },
}

impl ProtocolStatus {
    /// Content, items and signatures stay editable until completion
    pub fn ensure_editable(self) -> Result<(), WorkflowError> {
        match self {
            ProtocolStatus::Completed => Err(WorkflowError::Locked(self)),
            _ => Ok(()),
        }
    }

    pub fn transition(self, to: ProtocolStatus) -> Result<ProtocolStatus, WorkflowError> {
        use ProtocolStatus::*;
        match (self, to) {
            // a sent protocol may be re-sent
            (Draft, Sent) | (Sent, Sent) | (Sent, Completed) => Ok(to),
            (from, to) => Err(WorkflowError::InvalidTransition { from, to }),
        }
    }
}

/// One line of the items table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolItem {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_quantity", with = "quantity")]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_quantity() -> Decimal {
    Decimal::ONE
}

/// Quantities arrive as JSON numbers or numeric strings and are always
/// written back as numbers. Missing, null and blank all mean one.
mod quantity {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let normalized = value.normalize();
        if normalized.scale() == 0 {
            if let Some(i) = normalized.to_i64() {
                return serializer.serialize_i64(i);
            }
        }
        serializer.serialize_f64(normalized.to_f64().unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let parse = |text: &str| {
            Decimal::from_str(text)
                .or_else(|_| Decimal::from_scientific(text))
                .map_err(|_| serde::de::Error::custom(format!("invalid quantity '{}'", text)))
        };
        match Value::deserialize(deserializer)? {
            Value::Number(n) => parse(&n.to_string()),
            Value::String(s) if s.trim().is_empty() => Ok(default_quantity()),
            Value::String(s) => parse(s.trim().replace(',', ".").as_str()),
            Value::Null => Ok(default_quantity()),
            other => Err(serde::de::Error::custom(format!("invalid quantity {}", other))),
        }
    }
}

/// Parsed `protocols.content`. Keys outside the known set (template
/// description, layout and so on) are kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub items: Vec<ProtocolItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProtocolContent {
    /// Moves the item at `from` to position `to`, shifting the items between
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), String> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(format!("item positions must be below {}", len));
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        Ok(())
    }

    /// Fills client/company names only where they are still absent
    pub fn fill_client_defaults(&mut self, client_name: &str, company_name: Option<&str>) {
        if self.client_name.as_deref().map_or(true, str::is_empty) {
            self.client_name = Some(client_name.to_string());
        }
        if self.company_name.as_deref().map_or(true, str::is_empty) {
            self.company_name = company_name.map(str::to_string);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Protocol {
    pub id: Uuid,
    pub number: String,
    pub client_id: Uuid,
    pub template_id: Option<Uuid>,
    pub template_kind: Option<TemplateKind>,
    pub content: Json<ProtocolContent>,
    pub status: ProtocolStatus,
    pub manager_signature: Option<String>,
    pub client_signature: Option<String>,
    pub document_url: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PROTOCOLS: TableSpec = TableSpec {
    name: "protocols",
    columns: &[
        Column::new("id", ColumnKind::Uuid),
        Column::searchable("number"),
        Column::new("client_id", ColumnKind::Uuid),
        Column::new("template_id", ColumnKind::Uuid),
        Column::new("status", ColumnKind::Text),
        Column::new("created_by", ColumnKind::Uuid),
        Column::new("sent_at", ColumnKind::Timestamp),
        Column::new("completed_at", ColumnKind::Timestamp),
        Column::new("created_at", ColumnKind::Timestamp),
        Column::new("updated_at", ColumnKind::Timestamp),
    ],
    default_order: "created_at desc",
};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature must be a data:image/png or data:image/jpeg base64 URL")]
    Format,

    #[error("signature is not valid base64")]
    Encoding,

    #[error("signature exceeds {0} bytes")]
    TooLarge(usize),
}

/// Decodes a `data:image/png|jpeg;base64,` URL, returning the mime type and raw bytes
pub fn decode_signature(data_url: &str, max_bytes: usize) -> Result<(&'static str, Vec<u8>), SignatureError> {
    let (header, payload) = data_url.split_once(',').ok_or(SignatureError::Format)?;
    let mime = match header.to_ascii_lowercase().as_str() {
        "data:image/png;base64" => "image/png",
        "data:image/jpeg;base64" | "data:image/jpg;base64" => "image/jpeg",
        _ => return Err(SignatureError::Format),
    };
    // base64 expands by 4/3
    if payload.len() / 4 * 3 > max_bytes + 2 {
        return Err(SignatureError::TooLarge(max_bytes));
    }
    let bytes = STANDARD.decode(payload.trim()).map_err(|_| SignatureError::Encoding)?;
    if bytes.len() > max_bytes {
        return Err(SignatureError::TooLarge(max_bytes));
    }
    Ok((mime, bytes))
}

/// Expands a numbering format such as `PROT/{YYYY}/{NNNN}`.
///
/// Tokens: `{YYYY}`, `{YY}`, `{MM}`, `{DD}` and `{N...}` (sequence padded to the
/// number of `N`s). Unknown tokens are kept literally. A format without a
/// sequence token gets `/{seq}` appended so numbers stay unique.
pub fn format_number(format: &str, date: NaiveDate, seq: i64) -> String {
    expand_format(format, date, Some(seq))
}

/// Counter key for a format on a given day: the expanded number with the
/// sequence left as `#`. `PROT/{YYYY}/{NNNN}` counts per year, `P-{NNNN}`
/// never restarts.
pub fn numbering_scope(format: &str, date: NaiveDate) -> String {
    expand_format(format, date, None)
}

fn expand_format(format: &str, date: NaiveDate, seq: Option<i64>) -> String {
    let sequence = |width: usize| match seq {
        Some(seq) => format!("{:0width$}", seq, width = width),
        None => "#".to_string(),
    };
    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;
    let mut has_sequence = false;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            rest = &rest[start..];
            break;
        };
        let token = &rest[start + 1..start + len];
        match token {
            "YYYY" => out.push_str(&format!("{:04}", date.year())),
            "YY" => out.push_str(&format!("{:02}", date.year() % 100)),
            "MM" => out.push_str(&format!("{:02}", date.month())),
            "DD" => out.push_str(&format!("{:02}", date.day())),
            t if !t.is_empty() && t.chars().all(|c| c == 'N') => {
                has_sequence = true;
                out.push_str(&sequence(t.len()));
            }
            _ => out.push_str(&rest[start..=start + len]),
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);

    if !has_sequence {
        out.push('/');
        out.push_str(&sequence(0));
    }
    out
}
