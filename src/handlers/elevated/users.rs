use axum::extract::{Extension, Json, Path, State};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::user::UserWithRole;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::user_service::RoleInput;
use crate::state::AppState;

/// GET /api/users - every profile with its effective role
pub async fn list(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Vec<UserWithRole>> {
    Ok(ApiResponse::success(state.users().select_any(&user).await?))
}

/// PUT /api/users/:id/role
pub async fn put_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleInput>,
) -> ApiResult<UserWithRole> {
    Ok(ApiResponse::success(state.users().set_role(&user, id, body.role).await?))
}
