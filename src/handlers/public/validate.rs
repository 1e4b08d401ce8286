use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;

use super::decision_response;

/// Request body for POST /api/validate
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
    pub device_id: String,
}

/// POST /api/validate - Periodic license check from a bound device
///
/// Cheap heartbeat path: no writes beyond refreshing last_seen_at. A device
/// that was never bound (or was released) gets a device_not_bound denial
/// and should redeem again to reclaim a slot.
pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> Result<Response> {
    let code = body.code.trim();
    let device_id = body.device_id.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest(msg::CODE_EMPTY.into()));
    }
    if device_id.is_empty() {
        return Err(AppError::BadRequest(msg::DEVICE_ID_EMPTY.into()));
    }

    let conn = state.db.get()?;
    let decision =
        queries::revalidate(&conn, code, device_id)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    Ok(decision_response(decision))
}
