use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::models::Decision;
use crate::util::mask_code;

use super::decision_response;

/// Request body for POST /api/redeem
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Activation code from the purchase email
    pub code: String,
    /// Stable identifier the client derives for this install
    pub device_id: String,
    /// Human-readable device name shown in support tooling (e.g. "Work MacBook")
    #[serde(default)]
    pub label: Option<String>,
}

/// POST /api/redeem - Redeem an activation code on a device
///
/// The first successful call flips the activation to redeemed; later calls
/// bind additional devices up to the quota. Redeeming again from an
/// already-bound device is idempotent and refreshes its heartbeat.
pub async fn redeem(
    State(state): State<AppState>,
    Json(body): Json<RedeemRequest>,
) -> Result<Response> {
    let code = body.code.trim();
    let device_id = body.device_id.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest(msg::CODE_EMPTY.into()));
    }
    if device_id.is_empty() {
        return Err(AppError::BadRequest(msg::DEVICE_ID_EMPTY.into()));
    }

    let mut conn = state.db.get()?;
    let decision = queries::redeem_atomic(&mut conn, code, device_id, body.label.as_deref())?
        .or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    match &decision {
        Decision::Granted(snapshot) => {
            tracing::info!(
                code = %mask_code(code),
                device_count = snapshot.device_count,
                "Redeem granted"
            );
        }
        Decision::Denied(snapshot) => {
            tracing::info!(
                code = %mask_code(code),
                reason = snapshot.reason.as_str(),
                "Redeem denied"
            );
        }
    }

    Ok(decision_response(decision))
}
