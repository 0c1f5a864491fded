use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::AppState;

/// Resolves the verified token subject to an [`AuthUser`](crate::auth::AuthUser)
/// (profile ensured, role loaded; no role means worker)
pub async fn validate_user_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before user validation"))?;

    let user = state.users().resolve(&claims).await.map_err(|e| {
        tracing::warn!("User validation failed for {}: {}", claims.sub, e);
        ApiError::from(e)
    })?;

    tracing::debug!("Request by {} ({})", user.id, user.role);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
