use serde::{Deserialize, Serialize};

/// A device slot claimed against an activation.
///
/// `UNIQUE(activation_id, device_id)` in the schema means a device has at
/// most one row per activation for its whole lifetime. Releasing a slot
/// flips `active` off and stamps `released_at`; re-binding the same device
/// later reactivates the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub id: String,
    pub activation_id: String,
    /// Caller-supplied stable device identifier
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub active: bool,
    pub bound_at: i64,
    /// Heartbeat timestamp, refreshed on every successful revalidation
    pub last_seen_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<i64>,
}
