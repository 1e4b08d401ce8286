use serde::{Deserialize, Serialize};

/// A provider sale event, recorded verbatim before any processing.
///
/// `UNIQUE(provider, provider_purchase_id)` is the idempotency guard for
/// webhook retries: duplicate deliveries land on the same row. `processed`
/// flips to true exactly once, when an activation has been issued and
/// linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    /// Payment provider name (currently always "gumroad")
    pub provider: String,
    /// Provider's unique sale identifier
    pub provider_purchase_id: String,
    /// Provider's human-facing order number, kept opaque
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Provider-side product identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Provider-reported sale time, when the payload carried a parseable one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchased_at: Option<i64>,
    /// Raw webhook body exactly as received
    pub raw_payload: String,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,
    /// Activation issued for this purchase, set when processing completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<String>,
    pub created_at: i64,
}

/// Input for recording an incoming purchase.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub provider: String,
    pub provider_purchase_id: String,
    pub order_id: Option<String>,
    pub email: String,
    pub product_name: Option<String>,
    pub product_id: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub purchased_at: Option<i64>,
    pub raw_payload: String,
}
