use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::protocol::{Protocol, ProtocolContent};
use crate::documents::{DocumentFormat, RenderedDocument};
use crate::error::ApiError;
use crate::handlers::functions::idempotency_key;
use crate::handlers::ListQuery;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::dispatch_service::{SendInput, SendOutcome};
use crate::services::protocol_service::{NewProtocol, ReorderInput, SignaturesInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ContentBody {
    pub content: ProtocolContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    #[serde(default)]
    pub email_subject: String,
    #[serde(default)]
    pub email_body: String,
    pub recipient_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    pub format: Option<DocumentFormat>,
}

/// GET /api/protocols
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Vec<Protocol>> {
    Ok(ApiResponse::success(state.protocols().select_any(query.into_filter()?).await?))
}

/// GET /api/protocols/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().select_404(id).await?))
}

/// POST /api/protocols - blank, with content, or from a template
pub async fn post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<NewProtocol>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::created(state.protocols().create_one(&user, input).await?))
}

/// PUT /api/protocols/:id - replace content
pub async fn put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<ContentBody>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().update_content(&user, id, body.content).await?))
}

/// DELETE /api/protocols/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().delete_404(&user, id).await?))
}

/// PUT /api/protocols/:id/items/order
pub async fn put_item_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReorderInput>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().reorder_items(&user, id, body).await?))
}

/// PUT /api/protocols/:id/signatures
pub async fn put_signatures(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<SignaturesInput>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().set_signatures(&user, id, body).await?))
}

/// POST /api/protocols/:id/complete
pub async fn post_complete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Protocol> {
    Ok(ApiResponse::success(state.protocols().complete(&user, id).await?))
}

/// POST /api/protocols/:id/send
pub async fn post_send(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> ApiResult<SendOutcome> {
    let input = SendInput {
        subject: body.email_subject,
        body: body.email_body,
        recipient: body.recipient_email,
        idempotency_key: idempotency_key(&headers)?,
    };
    Ok(ApiResponse::success(state.dispatch().send(&user, id, input).await?))
}

/// GET /api/protocols/:id/document?format=pdf|docx
pub async fn get_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<DocumentQuery>,
) -> Result<RenderedDocument, ApiError> {
    let format = query.format.unwrap_or(DocumentFormat::Pdf);
    Ok(state.documents().process_document(&user, id, format).await?)
}
