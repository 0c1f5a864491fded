use axum::{
    extract::{Extension, Json, State},
    http::HeaderMap,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::documents::{DocumentFormat, RenderedDocument};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::dispatch_service::{SendInput, SendOutcome};
use crate::state::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessAndSendBody {
    pub protocol_id: Uuid,
    #[serde(default)]
    pub email_subject: String,
    #[serde(default)]
    pub email_body: String,
    pub recipient_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocumentBody {
    pub protocol_id: Uuid,
    #[serde(default = "default_format")]
    pub format: DocumentFormat,
}

fn default_format() -> DocumentFormat {
    DocumentFormat::Pdf
}

/// Optional `Idempotency-Key` header
pub fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    match headers.get(IDEMPOTENCY_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.to_string()))
            .map_err(|_| ApiError::field_error("Idempotency-Key", "must be visible ASCII")),
    }
}

/// A present `x-user-id` must name the authenticated caller
fn check_user_header(headers: &HeaderMap, user: &AuthUser) -> Result<(), ApiError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(());
    };
    let claimed = value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| ApiError::field_error("x-user-id", "must be a UUID"))?;
    if claimed != user.id {
        tracing::warn!("x-user-id {} does not match token subject {}", claimed, user.id);
        return Err(ApiError::forbidden("x-user-id does not match the authenticated user"));
    }
    Ok(())
}

/// POST /functions/v1/process-and-send-protocol
pub async fn process_and_send_protocol(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<ProcessAndSendBody>,
) -> ApiResult<SendOutcome> {
    check_user_header(&headers, &user)?;
    let input = SendInput {
        subject: body.email_subject,
        body: body.email_body,
        recipient: body.recipient_email,
        idempotency_key: idempotency_key(&headers)?,
    };
    Ok(ApiResponse::success(state.dispatch().send(&user, body.protocol_id, input).await?))
}

/// POST /functions/v1/process-document - binary PDF or DOCX
pub async fn process_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<RenderedDocument, ApiError> {
    Ok(state.documents().process_document(&user, body.protocol_id, body.format).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::user::Role;
    use axum::http::HeaderValue;

    fn user() -> AuthUser {
        AuthUser { id: Uuid::new_v4(), email: None, role: Role::Manager }
    }

    #[test]
    fn user_header_must_match_caller() {
        let caller = user();
        let mut headers = HeaderMap::new();
        assert!(check_user_header(&headers, &caller).is_ok());

        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&caller.id.to_string()).unwrap());
        assert!(check_user_header(&headers, &caller).is_ok());

        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap());
        assert_eq!(check_user_header(&headers, &caller).unwrap_err().status_code(), 403);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("admin"));
        assert_eq!(check_user_header(&headers, &caller).unwrap_err().status_code(), 400);
    }

    #[test]
    fn bodies_use_camel_case() {
        let body: ProcessAndSendBody = serde_json::from_value(serde_json::json!({
            "protocolId": "0b7f9b4e-9a33-4c1e-8a39-1d8f9fdb5e11",
            "emailSubject": "Protokół odbioru",
            "emailBody": "W załączeniu protokół."
        }))
        .unwrap();
        assert!(body.recipient_email.is_none());

        let doc: ProcessDocumentBody =
            serde_json::from_value(serde_json::json!({ "protocolId": "0b7f9b4e-9a33-4c1e-8a39-1d8f9fdb5e11" })).unwrap();
        assert_eq!(doc.format, DocumentFormat::Pdf);
    }

    #[test]
    fn idempotency_header_is_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("send-1"));
        assert_eq!(idempotency_key(&headers).unwrap().as_deref(), Some("send-1"));
    }
}
