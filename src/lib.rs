//! Keymint - self-hosted license activation server
//!
//! Keymint turns storefront purchases into activation codes and enforces a
//! per-code device quota: webhook ingestion mints codes, clients redeem
//! them onto devices and heartbeat against them, and an admin API covers
//! issuance, inspection, and revocation. All state lives in SQLite; every
//! contended decision is a single atomic transaction there.

pub mod config;
pub mod crypto;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod util;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::AppState;

/// Largest request body accepted anywhere (raw webhook payloads included).
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Assemble the full application router.
///
/// Tiers: `/api/*` behind the strict per-IP limiter, `/webhooks/*` behind
/// the lenient one, `/admin/*` behind the bearer-key middleware, and
/// `/health` open. Rate limiting keys on the peer IP, so the server must
/// be driven with `into_make_service_with_connect_info` (tests that skip
/// the limiter assemble routers from `handlers::*::router()` directly).
pub fn app(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(handlers::public::health))
        .merge(
            handlers::public::router()
                .layer(rate_limit::public_layer(config.rate_limit_public_rpm)),
        )
        .merge(
            handlers::webhooks::router()
                .layer(rate_limit::webhook_layer(config.rate_limit_webhook_rpm)),
        )
        .merge(handlers::admin::router(state.clone()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
