use axum::extract::{Extension, Json, Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::client::{Client, ClientInput, ClientOverview, ClientStatus};
use crate::handlers::ListQuery;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: ClientStatus,
}

/// GET /api/clients
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Vec<ClientOverview>> {
    let clients = state.clients().select_any(query.into_filter()?).await?;
    Ok(ApiResponse::success(clients))
}

/// GET /api/clients/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ClientOverview> {
    Ok(ApiResponse::success(state.clients().select_404(id).await?))
}

/// POST /api/clients
pub async fn post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<ClientInput>,
) -> ApiResult<Client> {
    let client = state.clients().create_one(&user, input).await?;
    Ok(ApiResponse::created(client))
}

/// PUT /api/clients/:id
pub async fn put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<ClientInput>,
) -> ApiResult<Client> {
    Ok(ApiResponse::success(state.clients().update_404(&user, id, input).await?))
}

/// PUT /api/clients/:id/status
pub async fn put_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Client> {
    Ok(ApiResponse::success(state.clients().set_status(&user, id, body.status).await?))
}
