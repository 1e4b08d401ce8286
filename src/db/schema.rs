use rusqlite::Connection;

/// Initialize the database schema.
///
/// Idempotent: every statement is IF NOT EXISTS, so this runs on every
/// boot. WAL mode is persistent per database file and belongs here; the
/// per-connection pragmas live in the pool init hook.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;

        -- Purchases (provider sale events, recorded verbatim before processing)
        -- UNIQUE(provider, provider_purchase_id) is the idempotency guard:
        -- webhook retries land on the same row instead of creating new ones.
        -- activation_id has no FK clause because activations is created below.
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            provider_purchase_id TEXT NOT NULL,
            order_id TEXT,
            email TEXT NOT NULL,
            product_name TEXT,
            product_id TEXT,
            price_cents INTEGER,
            currency TEXT,
            purchased_at INTEGER,
            raw_payload TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER,
            activation_id TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, provider_purchase_id)
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_email ON purchases(email);
        CREATE INDEX IF NOT EXISTS idx_purchases_unprocessed ON purchases(id) WHERE processed = 0;

        -- Activations (never deleted - revocation sets revoked_at and the row stays)
        -- Codes are stored plaintext: they are long-lived credentials the
        -- admin API must be able to list and resend.
        -- first_redeemed_at / first_device_id are written once and never updated.
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            product_type TEXT NOT NULL CHECK (product_type IN ('personal', 'professional', 'business', 'enterprise')),
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL CHECK (expires_at > issued_at),
            max_devices INTEGER NOT NULL CHECK (max_devices >= 1),
            redeemed INTEGER NOT NULL DEFAULT 0,
            first_redeemed_at INTEGER,
            first_device_id TEXT,
            revoked_at INTEGER,
            purchase_id TEXT REFERENCES purchases(id),
            metadata TEXT NOT NULL DEFAULT '{}',
            note TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_activations_email ON activations(email);
        CREATE INDEX IF NOT EXISTS idx_activations_purchase ON activations(purchase_id) WHERE purchase_id IS NOT NULL;

        -- Device bindings (one row per device per activation, for its whole lifetime)
        -- Releasing flips active off and stamps released_at; re-binding the
        -- same device reactivates the existing row, so history is kept.
        CREATE TABLE IF NOT EXISTS device_bindings (
            id TEXT PRIMARY KEY,
            activation_id TEXT NOT NULL REFERENCES activations(id),
            device_id TEXT NOT NULL,
            label TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            bound_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            released_at INTEGER,
            UNIQUE(activation_id, device_id)
        );
        CREATE INDEX IF NOT EXISTS idx_bindings_active ON device_bindings(activation_id) WHERE active = 1;
        CREATE INDEX IF NOT EXISTS idx_bindings_stale ON device_bindings(last_seen_at) WHERE active = 1;
        "#,
    )?;
    Ok(())
}
