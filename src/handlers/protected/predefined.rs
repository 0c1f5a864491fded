use axum::extract::{Extension, Json, Path, Query, State};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::template::{PredefinedTemplate, Template};
use crate::handlers::ListQuery;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::template_service::CopyPredefined;
use crate::state::AppState;

/// GET /api/predefined-templates
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Vec<PredefinedTemplate>> {
    Ok(ApiResponse::success(state.templates().select_predefined(query.into_filter()?).await?))
}

/// POST /api/predefined-templates/:id/copy - into the caller's user templates
pub async fn post_copy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<CopyPredefined>>,
) -> ApiResult<Template> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    Ok(ApiResponse::created(state.templates().copy_predefined(&user, id, input).await?))
}
