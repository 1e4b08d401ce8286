use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Store busy: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable reason codes carried in every error body.
/// Clients branch on these, never on the human-readable text.
impl AppError {
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::Json(_) => "invalid_request",
            AppError::Unauthorized => "unauthorized",
            AppError::Store(_) | AppError::Database(_) | AppError::Pool(_) => "store_error",
            AppError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let reason = self.reason();
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            // Store faults are transient by contract: callers may retry.
            AppError::Store(msg) => {
                tracing::error!("Store busy: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable", None)
            }
            AppError::Json(e) => (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string())),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            reason,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Turn a missing row into a NotFound error at the lookup site.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

/// Canonical user-facing error messages.
pub mod msg {
    pub const ACTIVATION_NOT_FOUND: &str = "Activation not found";
    pub const PURCHASE_NOT_FOUND: &str = "Purchase not found";
    pub const INVALID_EMAIL_FORMAT: &str = "Invalid email address format";
    pub const INVALID_PRODUCT_TYPE: &str = "Unknown product type";
    pub const DAYS_VALID_RANGE: &str = "days_valid must be between 1 and 36500";
    pub const MAX_DEVICES_RANGE: &str = "max_devices must be at least 1";
    pub const METADATA_NOT_OBJECT: &str = "metadata must be a JSON object";
    pub const CODE_EMPTY: &str = "code must not be empty";
    pub const DEVICE_ID_EMPTY: &str = "device_id must not be empty";
    pub const CODE_ALLOCATION: &str = "Could not allocate a unique activation code";
    pub const WEBHOOK_MISSING_SALE_ID: &str = "Webhook payload has no sale identifier";
    pub const WEBHOOK_MISSING_EMAIL: &str = "Webhook payload has no buyer email";
}
