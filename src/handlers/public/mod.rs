mod redeem;
mod validate;
mod devices;

pub use redeem::*;
pub use validate::*;
pub use devices::*;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use crate::db::AppState;
use crate::models::Decision;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health - Liveness probe, mounted outside the rate-limited tier.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Map a decision onto the wire: grants are 200, denials 403, both
/// carrying the same snapshot body.
pub(crate) fn decision_response(decision: Decision) -> Response {
    match decision {
        Decision::Granted(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Decision::Denied(snapshot) => (StatusCode::FORBIDDEN, Json(snapshot)).into_response(),
    }
}

/// The rate-limited public tier. `/health` is mounted separately so
/// monitoring probes never hit the limiter.
pub fn router() -> Router<AppState> {
    Router::new()
        // POST only: activation codes never belong in URLs or access logs
        .route("/api/redeem", post(redeem))
        .route("/api/validate", post(validate))
        .route("/api/release", post(release_device))
}
