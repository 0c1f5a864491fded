use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::filter::error::FilterError;

/// Embedded schema migrations (./migrations)
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        let db_details = match &err {
            sqlx::Error::Database(db) => Some((
                db.code().map(|c| c.into_owned()),
                db.constraint().unwrap_or("unknown").to_string(),
            )),
            _ => None,
        };

        match (err, db_details) {
            (_, Some((Some(code), constraint))) if code == "23505" => DatabaseError::UniqueViolation(constraint),
            (_, Some((Some(code), constraint))) if code == "23503" => DatabaseError::ForeignKeyViolation(constraint),
            (sqlx::Error::RowNotFound, _) => DatabaseError::NotFound("Record not found".to_string()),
            (e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_)), _) => {
                DatabaseError::Unavailable(e.to_string())
            }
            (e, _) => DatabaseError::Sqlx(e),
        }
    }
}

/// `host:port/database` without credentials, for logs
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => format!(
            "{}:{}{}",
            url.host_str().unwrap_or("localhost"),
            url.port().unwrap_or(5432),
            url.path()
        ),
        Err(_) => "<unparseable DATABASE_URL>".to_string(),
    }
}

/// Connection pool construction and schema management
pub struct DatabaseManager;

impl DatabaseManager {
    /// Build the pool from DATABASE_URL. Connections are opened lazily so the
    /// server can start (and report degraded health) while the database is down.
    pub fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
        Self::connect_url(&url, config)
    }

    pub fn connect_url(url: &str, config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_lazy(url)?;

        info!(
            "Created database pool for {} (max_connections={}, acquire_timeout={}s)",
            redact_url(url),
            config.max_connections,
            config.connection_timeout
        );
        Ok(pool)
    }

    /// Apply pending migrations
    pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
        MIGRATOR.run(pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }
}
