use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::crypto::verify_secret;
use crate::db::AppState;
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// Require the admin API key on every /admin route.
///
/// The configured key is held as a SHA-256 digest; the presented bearer
/// token is hashed and compared in constant time. With no key configured
/// the admin surface stays closed.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ref stored_hash) = state.admin_key_hash else {
        tracing::warn!("Admin request rejected: no admin API key configured");
        return Err(AppError::Unauthorized);
    };

    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    if !verify_secret(token, stored_hash) {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
