//! Prefixed ID generation for Keymint entities.
//!
//! All IDs use a `km_` brand prefix so they can never be confused with
//! provider-side identifiers (Gumroad sale IDs, order numbers, etc.).
//!
//! Format: `km_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["km_act_", "km_dev_", "km_pur_"];

/// Validate that a string is a valid Keymint prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `km_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    // Must start with a known prefix
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    // Get the hex part after the prefix
    let hex_part = &s[prefix.len()..];

    // Must be exactly 32 hex characters
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Keymint.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Activation,
    DeviceBinding,
    Purchase,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Activation => "km_act",
            Self::DeviceBinding => "km_dev",
            Self::Purchase => "km_pur",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
