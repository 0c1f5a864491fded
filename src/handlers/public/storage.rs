use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::integrations::storage::content_type_for;
use crate::integrations::Bucket;
use crate::state::AppState;

/// GET /storage/:bucket/*path - serves objects from the local disk store
///
/// Only mounted when STORAGE_BACKEND=local; hosted buckets publish their own URLs.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let bucket: Bucket = bucket.parse().map_err(|_| ApiError::not_found(format!("Bucket '{}' not found", bucket)))?;
    let bytes = state.store.get(bucket, &path).await?;

    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&path)));
    Ok(response)
}
