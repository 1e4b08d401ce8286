//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::{Activation, DeviceBinding, ProductTier, Purchase};

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a TEXT column holding a JSON document.
fn parse_json(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&row.get::<_, String>(col)?).map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ACTIVATION_COLS: &str = "id, code, email, product_type, issued_at, expires_at, max_devices, redeemed, first_redeemed_at, first_device_id, revoked_at, purchase_id, metadata, note";

pub const BINDING_COLS: &str =
    "id, activation_id, device_id, label, active, bound_at, last_seen_at, released_at";

pub const PURCHASE_COLS: &str = "id, provider, provider_purchase_id, order_id, email, product_name, product_id, price_cents, currency, purchased_at, raw_payload, processed, processed_at, activation_id, created_at";

// ============ FromRow Implementations ============

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let product_type: ProductTier = parse_enum(row, 3, "product_type")?;
        Ok(Activation {
            id: row.get(0)?,
            code: row.get(1)?,
            email: row.get(2)?,
            product_type,
            issued_at: row.get(4)?,
            expires_at: row.get(5)?,
            max_devices: row.get(6)?,
            redeemed: row.get(7)?,
            first_redeemed_at: row.get(8)?,
            first_device_id: row.get(9)?,
            revoked_at: row.get(10)?,
            purchase_id: row.get(11)?,
            metadata: parse_json(row, 12, "metadata")?,
            note: row.get(13)?,
        })
    }
}

impl FromRow for DeviceBinding {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DeviceBinding {
            id: row.get(0)?,
            activation_id: row.get(1)?,
            device_id: row.get(2)?,
            label: row.get(3)?,
            active: row.get(4)?,
            bound_at: row.get(5)?,
            last_seen_at: row.get(6)?,
            released_at: row.get(7)?,
        })
    }
}

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Purchase {
            id: row.get(0)?,
            provider: row.get(1)?,
            provider_purchase_id: row.get(2)?,
            order_id: row.get(3)?,
            email: row.get(4)?,
            product_name: row.get(5)?,
            product_id: row.get(6)?,
            price_cents: row.get(7)?,
            currency: row.get(8)?,
            purchased_at: row.get(9)?,
            raw_payload: row.get(10)?,
            processed: row.get(11)?,
            processed_at: row.get(12)?,
            activation_id: row.get(13)?,
            created_at: row.get(14)?,
        })
    }
}
