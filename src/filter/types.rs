use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    Null,
}

/// Postgres type of a filterable column; parameters are bound as text and cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Uuid,
    Timestamp,
    Boolean,
    Integer,
}

impl ColumnKind {
    pub fn cast(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Uuid => "uuid",
            ColumnKind::Timestamp => "timestamptz",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Integer => "bigint",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Included in free-text `search`
    pub searchable: bool,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind, searchable: false }
    }

    pub const fn searchable(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Text, searchable: true }
    }
}

/// Whitelist of columns a list endpoint may filter and order on
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub default_order: &'static str,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterData {
    #[serde(rename = "where")]
    pub where_clause: Option<serde_json::Value>,
    pub order: Option<serde_json::Value>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FilterData {
    /// Narrows the caller's conditions with an equality on `column`
    pub fn and_eq(mut self, column: &str, value: serde_json::Value) -> Self {
        self.where_clause = Some(narrow(self.where_clause.take(), column, value));
        self
    }
}

pub(crate) fn narrow(existing: Option<serde_json::Value>, column: &str, value: serde_json::Value) -> serde_json::Value {
    let extra = serde_json::json!({ column: value });
    match existing {
        Some(existing) if !existing.is_null() => serde_json::json!({ "$and": [existing, extra] }),
        _ => extra,
    }
}

#[derive(Debug, Clone)]
pub struct FilterWhereInfo {
    pub column: Column,
    pub operator: FilterOp,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Option<String>>,
}
