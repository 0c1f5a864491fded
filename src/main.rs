use tracing_subscriber::EnvFilter;

use handover_api::config::config;
use handover_api::database::DatabaseManager;
use handover_api::routes;
use handover_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("handover_api=info,tower_http=info")),
        )
        .init();

    let config = config();
    tracing::info!("Starting Handover API in {:?} mode", config.environment);
    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    let pool = DatabaseManager::connect(&config.database)?;
    if config.database.run_migrations {
        // the server still starts so /health can report the database state
        if let Err(e) = DatabaseManager::migrate(&pool).await {
            tracing::error!("Running migrations failed: {}", e);
        }
    }

    let state = AppState::from_config(pool, config);
    let app = routes::app(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;

    tracing::info!("Handover API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
