use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};

use crate::database::DatabaseManager;
use crate::state::AppState;

/// GET / - Service info
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Handover API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Handover protocols, clients, templates and document delivery",
            "endpoints": {
                "health": "/health (public)",
                "auth": "/api/auth/me",
                "clients": "/api/clients[/:id]",
                "protocols": "/api/protocols[/:id]",
                "templates": "/api/templates/:kind[/:id]",
                "predefined": "/api/predefined-templates",
                "settings": "/api/settings",
                "users": "/api/users (admin)",
                "functions": "/functions/v1/process-and-send-protocol, /functions/v1/process-document",
            }
        }
    }))
}

/// GET /health - Database liveness
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "Database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": { "status": "degraded", "timestamp": now, "database": "unavailable" }
                })),
            )
        }
    }
}
