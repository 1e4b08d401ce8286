//! Rate limiting configuration for public endpoints.
//!
//! Rate limits are applied per-IP address. Brute forcing a code is not the
//! concern (80 bits of entropy), this is about keeping misbehaving clients
//! from hammering validation in a loop.
//!
//! Tiers:
//! - Public: /api/redeem, /api/validate, /api/release
//! - Webhook: /webhooks/gumroad (storefronts burst on launch days)
//!
//! Configure via environment variables:
//! - KEYMINT_RATE_LIMIT_PUBLIC_RPM (default: 120)
//! - KEYMINT_RATE_LIMIT_WEBHOOK_RPM (default: 600)

use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Creates a rate limiter layer with the specified requests per minute.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    assert!(requests_per_minute > 0, "Rate limit must be greater than 0");

    let period_secs = 60 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs.max(1)))
        .burst_size(requests_per_minute)
        .finish()
        .expect("Failed to build rate limiter config");

    GovernorLayer::new(Arc::new(config))
}

/// Creates a rate limiter layer for the public validation endpoints.
pub fn public_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

/// Creates a rate limiter layer for the payment webhook endpoint.
/// Generous by default; storefronts retry aggressively.
pub fn webhook_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}
