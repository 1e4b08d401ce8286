use serde::{Deserialize, Serialize};

/// Product tiers sold through the storefront.
///
/// The tier decides the default validity window and device quota when an
/// issue request does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductTier {
    Personal,
    Professional,
    Business,
    Enterprise,
}

impl ProductTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductTier::Personal => "personal",
            ProductTier::Professional => "professional",
            ProductTier::Business => "business",
            ProductTier::Enterprise => "enterprise",
        }
    }

    /// Default validity window in days.
    pub fn default_days_valid(&self) -> i64 {
        match self {
            ProductTier::Personal | ProductTier::Professional => 365,
            ProductTier::Business => 730,
            ProductTier::Enterprise => 1095,
        }
    }

    /// Default device quota.
    pub fn default_max_devices(&self) -> i64 {
        match self {
            ProductTier::Personal => 3,
            ProductTier::Professional => 5,
            ProductTier::Business => 10,
            ProductTier::Enterprise => 99,
        }
    }

    /// Map a storefront product name to a tier.
    ///
    /// Matches on substrings so "Acme Pro (2-year)" still lands on
    /// Professional. Checked most-specific first; anything unrecognized
    /// falls back to Personal.
    pub fn from_product_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("enterprise") {
            ProductTier::Enterprise
        } else if name.contains("business") {
            ProductTier::Business
        } else if name.contains("professional") || name.contains("pro") {
            ProductTier::Professional
        } else {
            ProductTier::Personal
        }
    }
}

impl std::str::FromStr for ProductTier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(ProductTier::Personal),
            "professional" => Ok(ProductTier::Professional),
            "business" => Ok(ProductTier::Business),
            "enterprise" => Ok(ProductTier::Enterprise),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ProductTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A granted license activation.
///
/// Rows are never deleted. Revocation sets `revoked_at` and the row stays
/// behind as history; `first_redeemed_at` and `first_device_id` are written
/// once on the first successful redemption and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: String,
    /// Opaque redeemable code, globally unique (e.g. `KM-A2C4-N8PQ-R7ST-U2VW`)
    pub code: String,
    pub email: String,
    pub product_type: ProductTier,
    pub issued_at: i64,
    pub expires_at: i64,
    pub max_devices: i64,
    pub redeemed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_redeemed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
    /// Purchase that paid for this activation (None for admin-issued)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    /// Free-form key/value annotations, stored as a JSON object
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Activation {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Why this activation cannot be validated right now, if anything.
    /// Revocation takes precedence over expiry when both apply.
    pub fn denial_reason(&self, now: i64) -> Option<super::ValidationReason> {
        if self.is_revoked() {
            Some(super::ValidationReason::Revoked)
        } else if self.is_expired(now) {
            Some(super::ValidationReason::Expired)
        } else {
            None
        }
    }
}

/// Validated input for issuing a new activation.
#[derive(Debug, Clone)]
pub struct CreateActivation {
    pub email: String,
    pub product_type: ProductTier,
    pub days_valid: i64,
    pub max_devices: i64,
    pub purchase_id: Option<String>,
    pub metadata: serde_json::Value,
    pub note: Option<String>,
}
