use axum::{
    body::Bytes,
    extract::{Extension, Json, State},
    http::HeaderMap,
};

use super::templates::content_type;
use crate::auth::AuthUser;
use crate::database::models::settings::{Settings, SettingsInput};
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /api/settings
pub async fn get(State(state): State<AppState>) -> ApiResult<Settings> {
    Ok(ApiResponse::success(state.settings().select().await?))
}

/// PUT /api/settings
pub async fn put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<SettingsInput>,
) -> ApiResult<Settings> {
    Ok(ApiResponse::success(state.settings().update(&user, input).await?))
}

/// PUT /api/settings/logo - raw image body
pub async fn put_logo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Settings> {
    let settings = state.settings().upload_logo(&user, body.to_vec(), &content_type(&headers)).await?;
    Ok(ApiResponse::success(settings))
}

/// PUT /api/settings/template - raw DOCX body used as the default template
pub async fn put_template(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> ApiResult<Settings> {
    Ok(ApiResponse::success(state.settings().upload_default_template(&user, body.to_vec()).await?))
}
