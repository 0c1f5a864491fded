use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::filter::FilterData;

/// Query string accepted by list endpoints, e.g.
/// `?status=active&search=kowal&order=name asc&limit=20&offset=40`.
/// `where` takes a JSON filter object for anything more specific.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    pub search: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "where")]
    pub where_json: Option<String>,
}

impl ListQuery {
    pub fn into_filter(self) -> Result<FilterData, ApiError> {
        let where_clause = match self.where_json.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
            Some(raw) => Some(
                serde_json::from_str::<Value>(raw)
                    .map_err(|e| ApiError::bad_request(format!("Invalid 'where' JSON: {}", e)))?,
            ),
            None => None,
        };

        let mut filter = FilterData {
            where_clause,
            order: self.order.filter(|o| !o.trim().is_empty()).map(Value::String),
            search: self.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            limit: self.limit,
            offset: self.offset,
        };
        if let Some(status) = self.status.filter(|s| !s.is_empty()) {
            filter = filter.and_eq("status", json!(status));
        }
        if let Some(client_id) = self.client_id {
            filter = filter.and_eq("client_id", json!(client_id));
        }
        Ok(filter)
    }
}
