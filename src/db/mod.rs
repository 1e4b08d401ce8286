mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::email::EmailService;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Brand prefix stamped onto newly issued codes (e.g. "KM")
    pub code_prefix: String,
    /// Salted digest of the admin API key; None disables /admin routes
    pub admin_key_hash: Option<String>,
    /// Shared secret for Gumroad webhook signatures; None skips verification
    pub gumroad_webhook_secret: Option<String>,
    pub email_service: Arc<EmailService>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // busy_timeout and synchronous are per-connection, so they go through
    // the pool's init hook rather than the one-shot schema batch.
    let manager = SqliteConnectionManager::file(database_path).with_init(|c| {
        c.execute_batch(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000; PRAGMA synchronous = NORMAL;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}
