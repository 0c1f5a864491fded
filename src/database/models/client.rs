use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;
use crate::filter::{Column, ColumnKind, TableSpec};

text_enum! {
    /// Clients are never deleted; they are deactivated instead
    ClientStatus: "client status" {
        Active => "active",
        Inactive => "inactive",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company_name: Option<String>,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub status: ClientStatus,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `client_overview` view
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientOverview {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub client: Client,
    pub protocol_count: i64,
}

pub const CLIENT_OVERVIEW: TableSpec = TableSpec {
    name: "client_overview",
    columns: &[
        Column::new("id", ColumnKind::Uuid),
        Column::searchable("name"),
        Column::searchable("email"),
        Column::searchable("company_name"),
        Column::new("phone", ColumnKind::Text),
        Column::new("tax_id", ColumnKind::Text),
        Column::new("status", ColumnKind::Text),
        Column::new("created_by", ColumnKind::Uuid),
        Column::new("created_at", ColumnKind::Timestamp),
        Column::new("updated_at", ColumnKind::Timestamp),
        Column::new("protocol_count", ColumnKind::Integer),
    ],
    default_order: "created_at desc",
};

/// Fields accepted on create and update. `name` is required on create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company_name: Option<String>,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
}

impl ClientInput {
    /// Blank strings are stored as NULL
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }
        Self {
            name: clean(self.name),
            email: clean(self.email),
            phone: clean(self.phone),
            address: clean(self.address),
            company_name: clean(self.company_name),
            tax_id: clean(self.tax_id),
            registration_number: clean(self.registration_number),
        }
    }
}

/// Minimal structural e-mail check: one `@`, non-empty local part, dotted domain
pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}
