use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    EmailStatus: "e-mail status" {
        Sent => "sent",
        Failed => "failed",
    }
}

/// Audit row written for every delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailLog {
    pub id: Uuid,
    pub protocol_id: Option<Uuid>,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub provider_message_id: Option<String>,
    pub document_url: Option<String>,
    pub error: Option<String>,
    pub sent_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmailLog<'a> {
    pub protocol_id: Uuid,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub status: EmailStatus,
    pub provider_message_id: Option<&'a str>,
    pub document_url: Option<&'a str>,
    pub error: Option<&'a str>,
    pub sent_by: Option<Uuid>,
}
