pub mod from_row;
pub mod queries;
mod schema;

pub use schema::{init_audit_db, init_db};

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::crypto::ScanTokenSigner;
use crate::payments::PaymentGateway;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits for the lock before giving up with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state holding database pools and configuration
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (inventory, holds, orders, tickets)
    pub db: DbPool,
    /// Scan log database pool (separate file to isolate growth)
    pub audit: DbPool,
    pub hold_ttl_secs: i64,
    pub payment_session_ttl_secs: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub scan_signer: ScanTokenSigner,
    /// Payment processor used to open checkout sessions
    pub payments: Arc<dyn PaymentGateway>,
    /// Stripe webhook signing secret (`whsec_...`)
    pub stripe_webhook_secret: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(10).build(manager)
}
