use axum::extract::State;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::models::ValidationSnapshot;
use crate::util;

/// Request body for POST /api/release
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub code: String,
    pub device_id: String,
}

/// POST /api/release - Give a device slot back voluntarily
///
/// Idempotent: releasing a device that holds no active slot is a no-op,
/// not an error. The binding row stays behind as history and the same
/// device can redeem again later if a slot is free. Always answers 200
/// with a status snapshot; giving a slot back works even on an expired
/// or revoked activation.
pub async fn release_device(
    State(state): State<AppState>,
    Json(body): Json<ReleaseRequest>,
) -> Result<Json<ValidationSnapshot>> {
    let code = body.code.trim();
    let device_id = body.device_id.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest(msg::CODE_EMPTY.into()));
    }
    if device_id.is_empty() {
        return Err(AppError::BadRequest(msg::DEVICE_ID_EMPTY.into()));
    }

    let conn = state.db.get()?;
    let activation =
        queries::get_activation_by_code(&conn, code)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    let released = queries::release_binding(&conn, &activation.id, device_id)?;
    let device_count = queries::active_device_count(&conn, &activation.id)?;

    tracing::info!(
        activation_id = %activation.id,
        released,
        device_count,
        "Device release"
    );

    let snapshot = match activation.denial_reason(util::now()) {
        Some(reason) => ValidationSnapshot::denied(reason, &activation, device_count),
        None => ValidationSnapshot::granted(&activation, device_count),
    };
    Ok(Json(snapshot))
}
