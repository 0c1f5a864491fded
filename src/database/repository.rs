use serde_json::json;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{self, FromRow, PgPool, Row};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::filter::{Filter, FilterData, SqlResult, TableSpec};

/// Read-side access to a whitelisted table or view through [`Filter`]
pub struct Repository<T> {
    table: TableSpec,
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    pub fn new(table: TableSpec, pool: PgPool) -> Self {
        Self {
            table,
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    fn filter(&self, filter_data: FilterData) -> Result<Filter, DatabaseError> {
        let mut filter = Filter::new(self.table);
        filter.assign(filter_data)?;
        Ok(filter)
    }

    pub async fn select_any(&self, filter_data: FilterData) -> Result<Vec<T>, DatabaseError> {
        let sql = self.filter(filter_data)?.to_sql()?;
        let rows = bind_all(sqlx::query_as::<_, T>(&sql.query), &sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn select_one(&self, filter_data: FilterData) -> Result<Option<T>, DatabaseError> {
        let mut filter = self.filter(filter_data)?;
        filter.limit(1, None)?;
        let sql = filter.to_sql()?;
        let row = bind_all(sqlx::query_as::<_, T>(&sql.query), &sql).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    pub async fn select_404(&self, filter_data: FilterData) -> Result<T, DatabaseError> {
        self.select_one(filter_data)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Record not found in {}", self.table.name)))
    }

    pub async fn select_id(&self, id: Uuid) -> Result<T, DatabaseError> {
        self.select_404(FilterData { where_clause: Some(json!({ "id": id })), ..Default::default() })
            .await
    }

    pub async fn count(&self, filter_data: FilterData) -> Result<i64, DatabaseError> {
        let sql = self.filter(filter_data)?.to_count_sql()?;
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = q.bind(p.as_deref());
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }
}

fn bind_all<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>,
    sql: &'q SqlResult,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, PgRow>,
{
    // Every filter parameter is bound as text; the generated SQL casts it
    for p in sql.params.iter() {
        q = q.bind(p.as_deref());
    }
    q
}
