use serde_json::Value;

use super::error::FilterError;
use super::types::{Column, ColumnKind, FilterOp, FilterWhereInfo, TableSpec};

/// Compiles a JSON where-object into a parameterized SQL predicate.
///
/// Accepted shapes:
/// - `{ "status": "draft" }` implicit equality, `null` becomes `IS NULL`
/// - `{ "created_at": { "$gte": "2024-01-01T00:00:00Z" } }`
/// - `{ "status": { "$in": ["draft", "sent"] } }`
/// - `{ "$or": [ {...}, {...} ] }`, `{ "$and": [...] }`, `{ "$not": {...} }`
pub struct FilterWhere<'a> {
    table: &'a TableSpec,
    param_values: Vec<Option<String>>,
    param_index: usize,
}

impl<'a> FilterWhere<'a> {
    pub fn new(table: &'a TableSpec, starting_param_index: usize) -> Self {
        Self {
            table,
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn generate(
        table: &TableSpec,
        where_data: Option<&Value>,
        search: Option<&str>,
    ) -> Result<(String, Vec<Option<String>>), FilterError> {
        let mut filter_where = FilterWhere::new(table, 0);
        let mut sql_conditions = vec![];

        if let Some(where_data) = where_data {
            if let Some(sql) = filter_where.build(where_data)? {
                sql_conditions.push(sql);
            }
        }
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(sql) = filter_where.search_condition(term) {
                sql_conditions.push(sql);
            }
        }

        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, filter_where.param_values))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build(&mut self, where_data: &Value) -> Result<Option<String>, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(None),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut parts = vec![];
        for (key, value) in obj {
            if key.starts_with('$') {
                parts.push(self.parse_logical_operator(key, value)?);
            } else {
                for condition in self.parse_field_condition(key, value)? {
                    parts.push(self.build_sql_condition(&condition)?);
                }
            }
        }

        Ok(if parts.is_empty() { None } else { Some(parts.join(" AND ")) })
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut sql_parts = Vec::new();
                for v in arr {
                    if let Some(sql) = self.build(v)? {
                        sql_parts.push(format!("({})", sql));
                    }
                }
                if sql_parts.is_empty() {
                    return Ok("1=1".to_string());
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => {
                let sql = self.build(value)?.unwrap_or_else(|| "1=1".to_string());
                Ok(format!("NOT ({})", sql))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(&self, field: &str, value: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
        let column = *self
            .table
            .column(field)
            .ok_or_else(|| FilterError::InvalidColumn(format!("{} is not filterable on {}", field, self.table.name)))?;

        if let Value::Object(obj) = value {
            obj.iter()
                .map(|(op_key, op_val)| {
                    Ok(FilterWhereInfo { column, operator: Self::map_operator(op_key)?, data: op_val.clone() })
                })
                .collect()
        } else {
            // Implicit equality: { field: value }
            Ok(vec![FilterWhereInfo { column, operator: FilterOp::Eq, data: value.clone() }])
        }
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Neq,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$null" => FilterOp::Null,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let column = &condition.column;
        let quoted_column = format!("\"{}\"", column.name);
        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() {
                    Ok(format!("{} IS NULL", quoted_column))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.param(column, &condition.data)?))
                }
            }
            FilterOp::Neq => {
                if condition.data.is_null() {
                    Ok(format!("{} IS NOT NULL", quoted_column))
                } else {
                    Ok(format!("{} <> {}", quoted_column, self.param(column, &condition.data)?))
                }
            }
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.param(column, &condition.data)?)),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.param(column, &condition.data)?)),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.param(column, &condition.data)?)),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.param(column, &condition.data)?)),
            FilterOp::Like | FilterOp::ILike => {
                if column.kind != ColumnKind::Text {
                    return Err(FilterError::InvalidOperatorData(format!("pattern match on non-text column {}", column.name)));
                }
                let keyword = if condition.operator == FilterOp::Like { "LIKE" } else { "ILIKE" };
                Ok(format!("{} {} {}", quoted_column, keyword, self.param(column, &condition.data)?))
            }
            FilterOp::In => {
                if let Value::Array(values) = &condition.data {
                    if values.is_empty() {
                        return Ok("1=0".to_string());
                    }
                    let params = values
                        .iter()
                        .map(|v| self.param(column, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(format!("{} IN ({})", quoted_column, params.join(", ")))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.param(column, &condition.data)?))
                }
            }
            FilterOp::Null => match condition.data {
                Value::Bool(true) => Ok(format!("{} IS NULL", quoted_column)),
                Value::Bool(false) => Ok(format!("{} IS NOT NULL", quoted_column)),
                _ => Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        }
    }

    fn search_condition(&mut self, term: &str) -> Option<String> {
        let searchable: Vec<&'static str> = self.table.columns.iter().filter(|c| c.searchable).map(|c| c.name).collect();
        if searchable.is_empty() {
            return None;
        }
        let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        self.param_values.push(Some(format!("%{}%", escaped)));
        self.param_index += 1;
        let placeholder = format!("${}::text", self.param_index);
        let parts: Vec<String> = searchable.iter().map(|c| format!("\"{}\" ILIKE {}", c, placeholder)).collect();
        Some(format!("({})", parts.join(" OR ")))
    }

    fn param(&mut self, column: &Column, value: &Value) -> Result<String, FilterError> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => {
                return Err(FilterError::InvalidOperatorData(format!("null is not comparable on {}", column.name)))
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(FilterError::InvalidOperatorData(format!("expected scalar value for {}", column.name)))
            }
        };
        self.param_values.push(Some(text));
        self.param_index += 1;
        Ok(format!("${}::{}", self.param_index, column.kind.cast()))
    }
}
