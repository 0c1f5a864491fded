use axum::{
    body::Bytes,
    extract::{Extension, Json, Path, Query, State},
    http::{header, HeaderMap},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::template::{PublishStatus, Template, TemplateInput, TemplateKind};
use crate::handlers::ListQuery;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LockBody {
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: PublishStatus,
}

pub(crate) fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// GET /api/templates/:kind
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<TemplateKind>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Template>> {
    let templates = state.templates().select_any(&user, kind, query.into_filter()?).await?;
    Ok(ApiResponse::success(templates))
}

/// GET /api/templates/:kind/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().select_404(&user, kind, id).await?))
}

/// POST /api/templates/:kind
pub async fn post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<TemplateKind>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<Template> {
    Ok(ApiResponse::created(state.templates().create_one(&user, kind, input).await?))
}

/// PUT /api/templates/:kind/:id
pub async fn put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().update_404(&user, kind, id, input).await?))
}

/// DELETE /api/templates/:kind/:id - row and stored files together
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().delete_404(&user, kind, id).await?))
}

/// PUT /api/templates/:kind/:id/lock
pub async fn put_lock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
    Json(body): Json<LockBody>,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().set_locked(&user, kind, id, body.locked).await?))
}

/// PUT /api/templates/:kind/:id/status
pub async fn put_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().set_status(&user, kind, id, body.status).await?))
}

/// PUT /api/templates/:kind/:id/file - raw DOCX body
pub async fn put_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
    body: Bytes,
) -> ApiResult<Template> {
    Ok(ApiResponse::success(state.templates().upload_file(&user, kind, id, body.to_vec()).await?))
}

/// PUT /api/templates/:kind/:id/preview - raw image body with its Content-Type
pub async fn put_preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(TemplateKind, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Template> {
    let template = state
        .templates()
        .upload_preview(&user, kind, id, body.to_vec(), &content_type(&headers))
        .await?;
    Ok(ApiResponse::success(template))
}
