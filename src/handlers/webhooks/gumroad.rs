//! Gumroad sale webhook: the inbound edge of purchase reconciliation.
//!
//! Gumroad pings with `application/x-www-form-urlencoded` bodies where
//! every value is a string; resends and manual replays may arrive as JSON
//! with real numbers and booleans. Both shapes are normalized into one
//! [`GumroadEvent`] before touching the store, and the raw body is kept
//! verbatim on the purchase row.
//!
//! Responses are plain text so the Gumroad dashboard shows a meaningful
//! status line next to each delivery attempt.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::Value;

use crate::crypto::verify_webhook_signature;
use crate::db::{
    queries::{self, IngestOutcome},
    AppState,
};
use crate::email::{ActivationEmail, EmailTrigger};
use crate::models::{CreateActivation, NewPurchase, ProductTier};
use crate::util::{is_valid_email, mask_code};

pub const PROVIDER: &str = "gumroad";

/// Fields Keymint reads out of a Gumroad sale notification.
#[derive(Debug, Default, Clone)]
pub struct GumroadEvent {
    pub sale_id: Option<String>,
    pub order_number: Option<String>,
    pub email: Option<String>,
    pub product_name: Option<String>,
    pub product_id: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub purchased_at: Option<i64>,
    /// Gumroad "send test ping" button
    pub test: bool,
    pub refunded: bool,
}

impl GumroadEvent {
    fn from_value(value: &Value) -> Self {
        GumroadEvent {
            sale_id: str_field(value, "sale_id"),
            order_number: str_field(value, "order_number"),
            email: str_field(value, "email"),
            product_name: str_field(value, "product_name"),
            product_id: str_field(value, "product_id"),
            price_cents: int_field(value, "price"),
            currency: str_field(value, "currency"),
            purchased_at: str_field(value, "sale_timestamp")
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(&ts).ok())
                .map(|dt| dt.timestamp()),
            test: bool_field(value, "test"),
            refunded: bool_field(value, "refunded"),
        }
    }

    /// The identifier used to deduplicate deliveries: sale_id, falling
    /// back to order_number for old-style pings that lack one.
    fn provider_purchase_id(&self) -> Option<&str> {
        self.sale_id.as_deref().or(self.order_number.as_deref())
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

/// Parse the webhook body per its declared content type; an unknown or
/// missing content type falls back to trying JSON, then form encoding.
fn parse_event(headers: &HeaderMap, body: &Bytes) -> Option<GumroadEvent> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let value = if content_type.starts_with("application/json") {
        serde_json::from_slice::<Value>(body).ok()?
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        form_to_value(body)?
    } else {
        serde_json::from_slice::<Value>(body)
            .ok()
            .or_else(|| form_to_value(body))?
    };

    value.is_object().then(|| GumroadEvent::from_value(&value))
}

fn form_to_value(body: &[u8]) -> Option<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).ok()?;
    if pairs.is_empty() {
        return None;
    }
    Some(Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    ))
}

/// POST /webhooks/gumroad - Ingest a Gumroad sale, refund, or test ping
///
/// Safe to deliver any number of times: the purchase row's unique
/// constraint deduplicates retries, so a resend never mints a second
/// code. Signature verification runs over the raw bytes before any
/// parsing; with no secret configured it is skipped.
pub async fn handle_gumroad_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(ref secret) = state.gumroad_webhook_secret {
        let signature = headers
            .get("x-gumroad-signature")
            .and_then(|v| v.to_str().ok());
        match signature {
            Some(sig) if verify_webhook_signature(secret, &body, sig) => {}
            Some(_) => {
                tracing::warn!("Gumroad webhook rejected: signature mismatch");
                return (StatusCode::UNAUTHORIZED, "Invalid signature");
            }
            None => {
                tracing::warn!("Gumroad webhook rejected: missing X-Gumroad-Signature");
                return (StatusCode::UNAUTHORIZED, "Missing signature");
            }
        }
    }

    let Some(event) = parse_event(&headers, &body) else {
        tracing::warn!("Gumroad webhook rejected: unparseable body");
        return (StatusCode::BAD_REQUEST, "Unparseable payload");
    };

    if event.test {
        tracing::info!("Gumroad test ping acknowledged");
        return (StatusCode::OK, "Test ping acknowledged");
    }

    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("Gumroad webhook: pool error: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable");
        }
    };

    if event.refunded {
        return handle_refund(&conn, &event);
    }

    let Some(provider_purchase_id) = event.provider_purchase_id().map(String::from) else {
        return (StatusCode::BAD_REQUEST, "Missing sale identifier");
    };
    let Some(email) = event.email.clone().filter(|e| is_valid_email(e)) else {
        return (StatusCode::BAD_REQUEST, "Missing or invalid buyer email");
    };

    let tier = ProductTier::from_product_name(event.product_name.as_deref().unwrap_or(""));

    let new_purchase = NewPurchase {
        provider: PROVIDER.to_string(),
        provider_purchase_id,
        order_id: event.order_number.clone(),
        email: email.clone(),
        product_name: event.product_name.clone(),
        product_id: event.product_id.clone(),
        price_cents: event.price_cents,
        currency: event.currency.clone(),
        purchased_at: event.purchased_at,
        raw_payload: String::from_utf8_lossy(&body).into_owned(),
    };

    let purchase = match queries::record_purchase(&conn, &new_purchase) {
        Ok(purchase) => purchase,
        Err(e) => {
            tracing::error!("Gumroad webhook: failed to record purchase: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable");
        }
    };

    let input = CreateActivation {
        email,
        product_type: tier,
        days_valid: tier.default_days_valid(),
        max_devices: tier.default_max_devices(),
        purchase_id: Some(purchase.id.clone()),
        metadata: serde_json::json!({}),
        note: None,
    };

    match queries::ingest_purchase_atomic(&mut conn, &state.code_prefix, &purchase.id, &input) {
        Ok(IngestOutcome::AlreadyProcessed(_)) => {
            tracing::info!(purchase_id = %purchase.id, "Gumroad sale already processed");
            (StatusCode::OK, "Already processed")
        }
        Ok(IngestOutcome::Processed(activation)) => {
            tracing::info!(
                purchase_id = %purchase.id,
                activation_id = %activation.id,
                code = %mask_code(&activation.code),
                tier = %activation.product_type,
                "Issued activation for Gumroad sale"
            );
            deliver_code_email(&state, &activation, event.product_name.as_deref());
            (StatusCode::OK, "Activation issued")
        }
        Err(e) => {
            tracing::error!(purchase_id = %purchase.id, "Gumroad webhook: ingest failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable")
        }
    }
}

/// A refund revokes the linked activation; the event is not a purchase.
/// Everything here is idempotent, so refund retries are harmless.
fn handle_refund(
    conn: &rusqlite::Connection,
    event: &GumroadEvent,
) -> (StatusCode, &'static str) {
    let Some(provider_purchase_id) = event.provider_purchase_id() else {
        return (StatusCode::BAD_REQUEST, "Missing sale identifier");
    };

    let purchase = match queries::get_purchase_by_provider_id(conn, PROVIDER, provider_purchase_id)
    {
        Ok(Some(purchase)) => purchase,
        Ok(None) => {
            tracing::warn!(
                provider_purchase_id,
                "Gumroad refund for a sale we never recorded"
            );
            return (StatusCode::OK, "Unknown purchase");
        }
        Err(e) => {
            tracing::error!("Gumroad refund: lookup failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable");
        }
    };

    let Some(activation_id) = purchase.activation_id else {
        return (StatusCode::OK, "No activation to revoke");
    };

    match queries::revoke_activation(conn, &activation_id) {
        Ok(true) => {
            tracing::info!(activation_id = %activation_id, "Activation revoked after Gumroad refund");
            (StatusCode::OK, "Activation revoked")
        }
        Ok(false) => (StatusCode::OK, "Activation already revoked"),
        Err(e) => {
            tracing::error!("Gumroad refund: revoke failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable")
        }
    }
}

/// Fire-and-forget code delivery; a failed email never fails the webhook.
fn deliver_code_email(
    state: &AppState,
    activation: &crate::models::Activation,
    product_name: Option<&str>,
) {
    let email_service = state.email_service.clone();
    let to_email = activation.email.clone();
    let code = activation.code.clone();
    let product_name = product_name
        .map(String::from)
        .unwrap_or_else(|| activation.product_type.to_string());
    let activation_id = activation.id.clone();
    let expires_at = activation.expires_at;
    let max_devices = activation.max_devices;

    tokio::spawn(async move {
        let message = ActivationEmail {
            to_email: &to_email,
            code: &code,
            product_name: &product_name,
            activation_id: &activation_id,
            expires_at,
            max_devices,
            trigger: EmailTrigger::Purchase,
        };
        if let Err(e) = email_service.send_activation_email(message).await {
            tracing::warn!(
                activation_id = %activation_id,
                "Failed to deliver activation email: {}",
                e
            );
        }
    });
}
