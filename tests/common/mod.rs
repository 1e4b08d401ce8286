//! Test utilities and fixtures for Keymint integration tests

#![allow(dead_code)]

use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::Arc;

// Re-export the main library crate
pub use keymint::crypto;
pub use keymint::db::{init_db, queries, AppState};
pub use keymint::email::EmailService;
pub use keymint::models::*;
pub use keymint::util::now;

pub const TEST_PREFIX: &str = "KM";
pub const TEST_ADMIN_KEY: &str = "test-admin-key";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Get a future timestamp (days from now)
pub fn future_timestamp(days: i64) -> i64 {
    now() + (days * 86400)
}

/// Get a past timestamp (days ago)
pub fn past_timestamp(days: i64) -> i64 {
    now() - (days * 86400)
}

/// Create an AppState for testing with an in-memory database.
///
/// The pool is capped at one connection: each `:memory:` connection is its
/// own database, so a larger pool would hand handlers an empty schema.
pub fn create_test_app_state() -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        code_prefix: TEST_PREFIX.to_string(),
        admin_key_hash: Some(crypto::hash_secret(TEST_ADMIN_KEY)),
        gumroad_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        email_service: Arc::new(EmailService::disabled()),
    }
}

/// Create a Router with the public endpoints (without rate limiting)
pub fn public_app(state: AppState) -> Router {
    keymint::handlers::public::router().with_state(state)
}

/// Create a Router with the admin endpoints and bearer-key middleware
pub fn admin_app(state: AppState) -> Router {
    keymint::handlers::admin::router(state.clone()).with_state(state)
}

/// Create a Router with the webhook endpoints (without rate limiting)
pub fn webhook_app(state: AppState) -> Router {
    keymint::handlers::webhooks::router().with_state(state)
}

/// Default issue input: personal tier, 365 days, 3 devices
pub fn test_input(email: &str) -> CreateActivation {
    CreateActivation {
        email: email.to_string(),
        product_type: ProductTier::Personal,
        days_valid: 365,
        max_devices: 3,
        purchase_id: None,
        metadata: serde_json::json!({}),
        note: None,
    }
}

/// Issue an activation with default input for the given email
pub fn issue_test_activation(conn: &Connection, email: &str) -> Activation {
    queries::issue_activation(conn, TEST_PREFIX, &test_input(email))
        .expect("Failed to issue test activation")
}

/// Issue an activation with an explicit device quota
pub fn issue_test_activation_with_quota(
    conn: &Connection,
    email: &str,
    max_devices: i64,
) -> Activation {
    let input = CreateActivation {
        max_devices,
        ..test_input(email)
    };
    queries::issue_activation(conn, TEST_PREFIX, &input).expect("Failed to issue test activation")
}

/// Purchase input as recorded from a Gumroad sale
pub fn test_purchase_input(sale_id: &str, email: &str) -> NewPurchase {
    NewPurchase {
        provider: "gumroad".to_string(),
        provider_purchase_id: sale_id.to_string(),
        order_id: Some("100001".to_string()),
        email: email.to_string(),
        product_name: Some("Acme Personal".to_string()),
        product_id: Some("prod_abc".to_string()),
        price_cents: Some(2900),
        currency: Some("usd".to_string()),
        purchased_at: Some(now()),
        raw_payload: "{}".to_string(),
    }
}

/// Backdate an activation so it reads as expired.
/// Both columns move: the schema enforces expires_at > issued_at.
pub fn force_expire(conn: &Connection, activation_id: &str) {
    conn.execute(
        "UPDATE activations SET issued_at = ?1, expires_at = ?2 WHERE id = ?3",
        rusqlite::params![past_timestamp(20), past_timestamp(10), activation_id],
    )
    .expect("Failed to backdate activation");
}

/// Compute the X-Gumroad-Signature value for a raw webhook body
pub fn gumroad_signature(secret: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
