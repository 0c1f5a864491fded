use axum::extract::{Extension, State};

use crate::auth::Claims;
use crate::database::models::user::UserWithRole;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /api/auth/me - Caller's profile (refreshed from the token) and role
pub async fn me(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult<UserWithRole> {
    let user = state.users().current_user(&claims).await?;
    Ok(ApiResponse::success(user))
}
