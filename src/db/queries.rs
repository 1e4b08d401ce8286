use rusqlite::{params, Connection};

use crate::error::{msg, AppError, Result};
use crate::id::EntityType;
use crate::models::{
    Activation, BindingDisposition, CreateActivation, Decision, DeviceBinding, NewPurchase,
    Purchase, ValidationReason, ValidationSnapshot,
};
use crate::util::{self, now};

use super::from_row::{query_all, query_one, ACTIVATION_COLS, BINDING_COLS, PURCHASE_COLS};

// ============ Activations ============

const CODE_ALLOCATION_ATTEMPTS: usize = 4;

/// Longest accepted validity window (100 years). Keeps the expiry
/// arithmetic well inside i64 range no matter what the admin API sends.
pub const MAX_DAYS_VALID: i64 = 36500;

/// Generate an activation code: PREFIX-XXXX-XXXX-XXXX-XXXX (80 bits entropy)
///
/// Codes are long-lived, so unlike a short-TTL one-time code this needs
/// real entropy: four groups over a 32-character alphabet give ~10^24
/// possibilities. The alphabet skips 0/O/1/I lookalikes since users type
/// these by hand.
pub fn generate_activation_code(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();

    let mut part = || -> String {
        (0..4)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect()
    };

    format!("{}-{}-{}-{}-{}", prefix, part(), part(), part(), part())
}

/// Validate issue input and insert the activation with a fresh unique code.
///
/// A generated code colliding with an existing row is astronomically
/// unlikely but cheap to handle: retry with a new code a few times before
/// giving up.
pub fn issue_activation(
    conn: &Connection,
    prefix: &str,
    input: &CreateActivation,
) -> Result<Activation> {
    if !util::is_valid_email(&input.email) {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }
    if input.days_valid < 1 || input.days_valid > MAX_DAYS_VALID {
        return Err(AppError::BadRequest(msg::DAYS_VALID_RANGE.into()));
    }
    if input.max_devices < 1 {
        return Err(AppError::BadRequest(msg::MAX_DEVICES_RANGE.into()));
    }
    if !input.metadata.is_object() {
        return Err(AppError::BadRequest(msg::METADATA_NOT_OBJECT.into()));
    }

    for _ in 0..CODE_ALLOCATION_ATTEMPTS {
        let code = generate_activation_code(prefix);
        match create_activation(conn, &code, input) {
            Err(err) if is_code_collision(&err) => continue,
            result => return result,
        }
    }

    Err(AppError::Store(msg::CODE_ALLOCATION.into()))
}

fn is_code_collision(err: &AppError) -> bool {
    match err {
        AppError::Database(rusqlite::Error::SqliteFailure(e, Some(message))) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains("activations.code")
        }
        _ => false,
    }
}

/// Insert a new activation row.
///
/// The code must already be generated and validated by the caller. A code
/// collision surfaces as a UNIQUE constraint violation on `activations.code`
/// so the issuance layer can retry with a fresh code.
pub fn create_activation(
    conn: &Connection,
    code: &str,
    input: &CreateActivation,
) -> Result<Activation> {
    let id = EntityType::Activation.gen_id();
    let issued_at = now();
    let expires_at = issued_at + input.days_valid * util::SECONDS_PER_DAY;
    let metadata = serde_json::to_string(&input.metadata)?;

    conn.execute(
        "INSERT INTO activations (id, code, email, product_type, issued_at, expires_at, max_devices, redeemed, purchase_id, metadata, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)",
        params![
            &id,
            code,
            &input.email,
            input.product_type.as_str(),
            issued_at,
            expires_at,
            input.max_devices,
            &input.purchase_id,
            &metadata,
            &input.note
        ],
    )?;

    Ok(Activation {
        id,
        code: code.to_string(),
        email: input.email.clone(),
        product_type: input.product_type,
        issued_at,
        expires_at,
        max_devices: input.max_devices,
        redeemed: false,
        first_redeemed_at: None,
        first_device_id: None,
        revoked_at: None,
        purchase_id: input.purchase_id.clone(),
        metadata: input.metadata.clone(),
        note: input.note.clone(),
    })
}

pub fn get_activation_by_id(conn: &Connection, id: &str) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!("SELECT {} FROM activations WHERE id = ?1", ACTIVATION_COLS),
        &[&id],
    )
}

pub fn get_activation_by_code(conn: &Connection, code: &str) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!("SELECT {} FROM activations WHERE code = ?1", ACTIVATION_COLS),
        &[&code],
    )
}

/// Look up the activation issued for a purchase, if any.
pub fn get_activation_by_purchase(
    conn: &Connection,
    purchase_id: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE purchase_id = ?1",
            ACTIVATION_COLS
        ),
        &[&purchase_id],
    )
}

/// List activations, newest first, optionally filtered by email.
/// Returns the page plus the total row count for pagination.
pub fn list_activations(
    conn: &Connection,
    email: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Activation>, i64)> {
    match email {
        Some(email) => {
            let rows = query_all(
                conn,
                &format!(
                    "SELECT {} FROM activations WHERE email = ?1 ORDER BY issued_at DESC, id DESC LIMIT ?2 OFFSET ?3",
                    ACTIVATION_COLS
                ),
                &[&email, &limit, &offset],
            )?;
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM activations WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )?;
            Ok((rows, total))
        }
        None => {
            let rows = query_all(
                conn,
                &format!(
                    "SELECT {} FROM activations ORDER BY issued_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                    ACTIVATION_COLS
                ),
                &[&limit, &offset],
            )?;
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM activations", [], |row| row.get(0))?;
            Ok((rows, total))
        }
    }
}

/// Soft-revoke an activation. The row is never deleted.
///
/// Idempotent: only the first call stamps `revoked_at`, repeat calls are
/// no-ops so the original revocation time is preserved. Returns whether
/// this call performed the revocation.
pub fn revoke_activation(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE activations SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        params![now(), id],
    )?;
    Ok(rows > 0)
}

/// Flip an unredeemed activation to redeemed, stamping the immutable
/// first-redemption facts.
///
/// The `redeemed = 0` guard makes the transition one-way: once set,
/// `first_redeemed_at` and `first_device_id` can never be overwritten.
/// Returns whether this call performed the transition.
pub fn mark_activation_redeemed(
    conn: &Connection,
    activation_id: &str,
    device_id: &str,
    redeemed_at: i64,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE activations SET redeemed = 1, first_redeemed_at = ?1, first_device_id = ?2
         WHERE id = ?3 AND redeemed = 0",
        params![redeemed_at, device_id, activation_id],
    )?;
    Ok(rows > 0)
}

// ============ Device bindings ============

/// Result of attempting to bind a device to an activation
#[derive(Debug)]
pub enum BindOutcome {
    /// Device already holds an active slot; heartbeat was refreshed
    AlreadyBound(DeviceBinding),
    /// Device claimed a free slot (fresh row or reactivated released row)
    NewlyBound(DeviceBinding),
    /// All slots taken by other devices
    QuotaExceeded,
}

/// Bind a device inside an already-open transaction.
///
/// The caller is responsible for transaction scope; use
/// [`bind_device_atomic`] when no transaction is in flight. The
/// count-then-insert here is only safe because the enclosing transaction
/// was opened IMMEDIATE, which serializes writers for the whole
/// check-and-claim sequence.
pub fn bind_device_in_tx(
    tx: &Connection,
    activation_id: &str,
    max_devices: i64,
    device_id: &str,
    label: Option<&str>,
) -> Result<BindOutcome> {
    let existing: Option<DeviceBinding> = query_one(
        tx,
        &format!(
            "SELECT {} FROM device_bindings WHERE activation_id = ?1 AND device_id = ?2",
            BINDING_COLS
        ),
        &[&activation_id, &device_id],
    )?;

    let now = now();

    if let Some(binding) = existing {
        if binding.active {
            // Same device re-binding is idempotent: refresh the heartbeat
            tx.execute(
                "UPDATE device_bindings SET last_seen_at = ?1 WHERE id = ?2",
                params![now, binding.id],
            )?;
            return Ok(BindOutcome::AlreadyBound(DeviceBinding {
                last_seen_at: now,
                ..binding
            }));
        }

        // Released row for this device: reactivating it claims a slot, so
        // the quota check still applies.
        let active_count = active_device_count(tx, activation_id)?;
        if active_count >= max_devices {
            return Ok(BindOutcome::QuotaExceeded);
        }

        tx.execute(
            "UPDATE device_bindings SET active = 1, bound_at = ?1, last_seen_at = ?1, released_at = NULL,
             label = COALESCE(?2, label) WHERE id = ?3",
            params![now, label, binding.id],
        )?;
        return Ok(BindOutcome::NewlyBound(DeviceBinding {
            label: label.map(String::from).or(binding.label),
            active: true,
            bound_at: now,
            last_seen_at: now,
            released_at: None,
            ..binding
        }));
    }

    // Unknown device: count, then insert only while under quota
    let active_count = active_device_count(tx, activation_id)?;
    if active_count >= max_devices {
        return Ok(BindOutcome::QuotaExceeded);
    }

    let id = EntityType::DeviceBinding.gen_id();
    tx.execute(
        "INSERT INTO device_bindings (id, activation_id, device_id, label, active, bound_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        params![&id, activation_id, device_id, label, now],
    )?;

    Ok(BindOutcome::NewlyBound(DeviceBinding {
        id,
        activation_id: activation_id.to_string(),
        device_id: device_id.to_string(),
        label: label.map(String::from),
        active: true,
        bound_at: now,
        last_seen_at: now,
        released_at: None,
    }))
}

/// Atomically bind a device to an activation, enforcing the device quota.
///
/// Uses an IMMEDIATE transaction to take the write lock up front, so two
/// concurrent binds for the last free slot cannot both pass the count
/// check. Exactly `max_devices` binds can ever hold active slots at once.
pub fn bind_device_atomic(
    conn: &mut Connection,
    activation_id: &str,
    max_devices: i64,
    device_id: &str,
    label: Option<&str>,
) -> Result<BindOutcome> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let outcome = bind_device_in_tx(&tx, activation_id, max_devices, device_id, label)?;
    tx.commit()?;
    Ok(outcome)
}

pub fn get_binding(
    conn: &Connection,
    activation_id: &str,
    device_id: &str,
) -> Result<Option<DeviceBinding>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM device_bindings WHERE activation_id = ?1 AND device_id = ?2",
            BINDING_COLS
        ),
        &[&activation_id, &device_id],
    )
}

/// All bindings for an activation, active and released, oldest first.
pub fn list_bindings(conn: &Connection, activation_id: &str) -> Result<Vec<DeviceBinding>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM device_bindings WHERE activation_id = ?1 ORDER BY bound_at ASC, id ASC",
            BINDING_COLS
        ),
        &[&activation_id],
    )
}

pub fn active_device_count(conn: &Connection, activation_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM device_bindings WHERE activation_id = ?1 AND active = 1",
        params![activation_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Refresh the heartbeat on an active binding.
/// Returns false when the device holds no active slot.
pub fn touch_binding(conn: &Connection, activation_id: &str, device_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE device_bindings SET last_seen_at = ?1
         WHERE activation_id = ?2 AND device_id = ?3 AND active = 1",
        params![now(), activation_id, device_id],
    )?;
    Ok(rows > 0)
}

/// Release a device slot. The row stays behind as history.
///
/// Idempotent: releasing an already-released or never-bound device is a
/// no-op. Returns whether a slot was actually freed.
pub fn release_binding(conn: &Connection, activation_id: &str, device_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE device_bindings SET active = 0, released_at = ?1
         WHERE activation_id = ?2 AND device_id = ?3 AND active = 1",
        params![now(), activation_id, device_id],
    )?;
    Ok(rows > 0)
}

/// Release every active binding not seen since the cutoff.
/// Used by the background sweep to free slots on abandoned devices.
pub fn release_stale_bindings(conn: &Connection, cutoff: i64) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE device_bindings SET active = 0, released_at = ?1
         WHERE active = 1 AND last_seen_at < ?2",
        params![now(), cutoff],
    )?;
    Ok(rows)
}

// ============ Redemption ============

/// Redeem an activation code for a device, in a single transaction.
///
/// Opens an IMMEDIATE transaction so eligibility checks, the quota count
/// and the redeemed flip all see and produce one consistent state. Two
/// devices racing to redeem the same code serialize here: one records the
/// first redemption, the other lands on the already-redeemed path and
/// binds normally.
///
/// Returns None when no activation matches the code. Denials roll back
/// (nothing is written for an expired, revoked or over-quota attempt).
pub fn redeem_atomic(
    conn: &mut Connection,
    code: &str,
    device_id: &str,
    label: Option<&str>,
) -> Result<Option<Decision>> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let Some(mut activation) = get_activation_by_code(&tx, code)? else {
        return Ok(None);
    };

    let now = now();
    if let Some(reason) = activation.denial_reason(now) {
        let device_count = active_device_count(&tx, &activation.id)?;
        return Ok(Some(Decision::Denied(ValidationSnapshot::denied(
            reason,
            &activation,
            device_count,
        ))));
    }

    match bind_device_in_tx(&tx, &activation.id, activation.max_devices, device_id, label)? {
        BindOutcome::QuotaExceeded => {
            let device_count = active_device_count(&tx, &activation.id)?;
            Ok(Some(Decision::Denied(ValidationSnapshot::denied(
                ValidationReason::QuotaExceeded,
                &activation,
                device_count,
            ))))
        }
        outcome @ (BindOutcome::AlreadyBound(_) | BindOutcome::NewlyBound(_)) => {
            let disposition = match outcome {
                BindOutcome::AlreadyBound(_) => BindingDisposition::AlreadyBound,
                _ => BindingDisposition::NewlyBound,
            };

            if !activation.redeemed {
                // First redemption: stamp the immutable facts. The guarded
                // UPDATE cannot lose a race inside an IMMEDIATE transaction,
                // so 0 rows here means the store itself is inconsistent.
                if !mark_activation_redeemed(&tx, &activation.id, device_id, now)? {
                    return Err(AppError::Internal(
                        "Activation flipped to redeemed outside the transaction".into(),
                    ));
                }
                activation.redeemed = true;
                activation.first_redeemed_at = Some(now);
                activation.first_device_id = Some(device_id.to_string());
            }

            let device_count = active_device_count(&tx, &activation.id)?;
            tx.commit()?;
            Ok(Some(Decision::Granted(
                ValidationSnapshot::granted(&activation, device_count).with_binding(disposition),
            )))
        }
    }
}

/// Revalidate an existing binding, refreshing its heartbeat.
///
/// Read-mostly and race-tolerant, so no transaction: the single UPDATE on
/// the heartbeat is atomic on its own, and a concurrent release simply
/// wins or loses by ordering.
pub fn revalidate(conn: &Connection, code: &str, device_id: &str) -> Result<Option<Decision>> {
    let Some(activation) = get_activation_by_code(conn, code)? else {
        return Ok(None);
    };

    let now = now();
    if let Some(reason) = activation.denial_reason(now) {
        let device_count = active_device_count(conn, &activation.id)?;
        return Ok(Some(Decision::Denied(ValidationSnapshot::denied(
            reason,
            &activation,
            device_count,
        ))));
    }

    let touched = touch_binding(conn, &activation.id, device_id)?;
    let device_count = active_device_count(conn, &activation.id)?;

    if touched {
        Ok(Some(Decision::Granted(ValidationSnapshot::granted(
            &activation,
            device_count,
        ))))
    } else {
        Ok(Some(Decision::Denied(ValidationSnapshot::denied(
            ValidationReason::DeviceNotBound,
            &activation,
            device_count,
        ))))
    }
}

// ============ Purchases ============

/// Record an incoming purchase, deduplicating on (provider, provider_purchase_id).
///
/// INSERT OR IGNORE makes this the idempotency guard: the first delivery
/// creates the row, every retry lands on the existing one. Always returns
/// the stored row so the caller can see its processed state.
pub fn record_purchase(conn: &Connection, input: &NewPurchase) -> Result<Purchase> {
    conn.execute(
        "INSERT OR IGNORE INTO purchases (id, provider, provider_purchase_id, order_id, email, product_name, product_id, price_cents, currency, purchased_at, raw_payload, processed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
        params![
            EntityType::Purchase.gen_id(),
            &input.provider,
            &input.provider_purchase_id,
            &input.order_id,
            &input.email,
            &input.product_name,
            &input.product_id,
            input.price_cents,
            &input.currency,
            input.purchased_at,
            &input.raw_payload,
            now()
        ],
    )?;

    let purchase = get_purchase_by_provider_id(conn, &input.provider, &input.provider_purchase_id)?
        .ok_or_else(|| AppError::Internal("Purchase row missing after insert".into()))?;
    Ok(purchase)
}

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_purchase_by_provider_id(
    conn: &Connection,
    provider: &str,
    provider_purchase_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE provider = ?1 AND provider_purchase_id = ?2",
            PURCHASE_COLS
        ),
        &[&provider, &provider_purchase_id],
    )
}

/// List purchases, newest first, optionally filtered by processed state.
/// Returns the page plus the total row count for pagination.
pub fn list_purchases(
    conn: &Connection,
    processed: Option<bool>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Purchase>, i64)> {
    match processed {
        Some(processed) => {
            let flag = processed as i64;
            let rows = query_all(
                conn,
                &format!(
                    "SELECT {} FROM purchases WHERE processed = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
                    PURCHASE_COLS
                ),
                &[&flag, &limit, &offset],
            )?;
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM purchases WHERE processed = ?1",
                params![flag],
                |row| row.get(0),
            )?;
            Ok((rows, total))
        }
        None => {
            let rows = query_all(
                conn,
                &format!(
                    "SELECT {} FROM purchases ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                    PURCHASE_COLS
                ),
                &[&limit, &offset],
            )?;
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM purchases", [], |row| row.get(0))?;
            Ok((rows, total))
        }
    }
}

/// Flip a purchase to processed and link the issued activation.
///
/// The `processed = 0` guard ensures the flip happens exactly once even
/// under concurrent deliveries; the loser sees 0 rows affected. Returns
/// whether this call won.
pub fn mark_purchase_processed(
    conn: &Connection,
    purchase_id: &str,
    activation_id: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE purchases SET processed = 1, processed_at = ?1, activation_id = ?2
         WHERE id = ?3 AND processed = 0",
        params![now(), activation_id, purchase_id],
    )?;
    Ok(rows > 0)
}

/// Result of reconciling a recorded purchase into an activation
#[derive(Debug)]
pub enum IngestOutcome {
    /// An earlier delivery already processed this purchase
    AlreadyProcessed(Purchase),
    /// This delivery issued (or adopted) the activation
    Processed(Activation),
}

/// Turn a recorded purchase into exactly one activation.
///
/// Runs under an IMMEDIATE transaction so concurrent deliveries of the
/// same purchase serialize: one issues, the rest observe `processed = 1`
/// and return AlreadyProcessed. If an earlier run issued the activation
/// but crashed before flipping the processed flag, the linked activation
/// is adopted instead of issuing a duplicate.
///
/// `input.purchase_id` must point at the purchase row, which the caller
/// records up front via [`record_purchase`].
pub fn ingest_purchase_atomic(
    conn: &mut Connection,
    prefix: &str,
    purchase_id: &str,
    input: &CreateActivation,
) -> Result<IngestOutcome> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let Some(purchase) = get_purchase_by_id(&tx, purchase_id)? else {
        return Err(AppError::NotFound(msg::PURCHASE_NOT_FOUND.into()));
    };
    if purchase.processed {
        return Ok(IngestOutcome::AlreadyProcessed(purchase));
    }

    let activation = match get_activation_by_purchase(&tx, &purchase.id)? {
        Some(existing) => existing,
        None => issue_activation(&tx, prefix, input)?,
    };

    if !mark_purchase_processed(&tx, &purchase.id, &activation.id)? {
        return Ok(IngestOutcome::AlreadyProcessed(purchase));
    }

    tx.commit()?;
    Ok(IngestOutcome::Processed(activation))
}
