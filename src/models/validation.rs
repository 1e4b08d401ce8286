use serde::{Deserialize, Serialize};

use super::activation::{Activation, ProductTier};

/// Why a validation request was denied, or `Ok` when it was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Ok,
    Expired,
    Revoked,
    QuotaExceeded,
    DeviceNotBound,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Ok => "ok",
            ValidationReason::Expired => "expired",
            ValidationReason::Revoked => "revoked",
            ValidationReason::QuotaExceeded => "quota_exceeded",
            ValidationReason::DeviceNotBound => "device_not_bound",
        }
    }
}

/// How a granted redeem satisfied the requesting device's slot claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingDisposition {
    NewlyBound,
    AlreadyBound,
}

/// Point-in-time view of an activation, returned with every decision.
///
/// Denials carry the same shape as grants so a client can tell the user
/// what they are entitled to without a second round trip.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSnapshot {
    pub valid: bool,
    pub reason: ValidationReason,
    pub product_type: ProductTier,
    pub expires_at: i64,
    pub device_count: i64,
    pub device_quota: i64,
    /// Present on granted redeems: whether this call claimed a new slot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingDisposition>,
}

impl ValidationSnapshot {
    pub fn granted(activation: &Activation, device_count: i64) -> Self {
        Self {
            valid: true,
            reason: ValidationReason::Ok,
            product_type: activation.product_type,
            expires_at: activation.expires_at,
            device_count,
            device_quota: activation.max_devices,
            binding: None,
        }
    }

    pub fn denied(reason: ValidationReason, activation: &Activation, device_count: i64) -> Self {
        Self {
            valid: false,
            reason,
            product_type: activation.product_type,
            expires_at: activation.expires_at,
            device_count,
            device_quota: activation.max_devices,
            binding: None,
        }
    }

    pub fn with_binding(mut self, binding: BindingDisposition) -> Self {
        self.binding = Some(binding);
        self
    }
}

/// Outcome of a redeem or revalidate request against a known activation
#[derive(Debug, Clone)]
pub enum Decision {
    Granted(ValidationSnapshot),
    Denied(ValidationSnapshot),
}

impl Decision {
    pub fn snapshot(&self) -> &ValidationSnapshot {
        match self {
            Decision::Granted(snapshot) | Decision::Denied(snapshot) => snapshot,
        }
    }
}
