use std::env;

use crate::crypto::ScanTokenSigner;

/// Default hold lifetime: 10 minutes.
pub const DEFAULT_HOLD_TTL_SECS: i64 = 600;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Lifetime of an inventory hold created at checkout.
    pub hold_ttl_secs: i64,
    /// Lifetime of the external payment session. Never longer than `hold_ttl_secs`.
    pub payment_session_ttl_secs: i64,
    pub hold_sweep_interval_secs: u64,
    /// Days to keep webhook dedup records (0 = keep forever)
    pub webhook_retention_days: i64,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub scan_signer: ScanTokenSigner,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BOXOFFICE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let hold_ttl_secs = parse_env("HOLD_TTL_SECS", DEFAULT_HOLD_TTL_SECS).max(60);

        // The payment session must lapse no later than the inventory claim.
        let payment_session_ttl_secs =
            parse_env("PAYMENT_SESSION_TTL_SECS", hold_ttl_secs).clamp(60, hold_ttl_secs);

        let scan_signer = match env::var("TICKET_SIGNING_SECRET") {
            Ok(encoded) => ScanTokenSigner::from_base64(&encoded)
                .expect("TICKET_SIGNING_SECRET must be base64-encoded 32 bytes"),
            Err(_) if dev_mode => {
                tracing::warn!(
                    "TICKET_SIGNING_SECRET not set - using a random key, issued tickets will not survive a restart"
                );
                ScanTokenSigner::generate()
            }
            Err(_) => panic!("TICKET_SIGNING_SECRET is required outside dev mode"),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "boxoffice.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "boxoffice_audit.db".to_string()),
            success_url: env::var("SUCCESS_URL")
                .unwrap_or_else(|_| format!("{}/checkout/success", base_url)),
            cancel_url: env::var("CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/checkout/cancel", base_url)),
            base_url,
            dev_mode,
            hold_ttl_secs,
            payment_session_ttl_secs,
            hold_sweep_interval_secs: parse_env("HOLD_SWEEP_INTERVAL_SECS", 30u64).max(1),
            webhook_retention_days: parse_env("WEBHOOK_RETENTION_DAYS", 30),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            scan_signer,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
