use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use boxoffice::config::Config;
use boxoffice::db::{AppState, create_pool, init_audit_db, init_db, queries};
use boxoffice::handlers;
use boxoffice::holds;
use boxoffice::models::{
    ApiKeyRole, CreateApiKey, CreateEvent, CreateFeeRule, CreateProduct, CreateTicketTier,
};
use boxoffice::payments::{DisabledGateway, PaymentGateway, StripeClient};

#[derive(Parser, Debug)]
#[command(name = "boxoffice")]
#[command(about = "Ticket inventory, checkout and check-in server")]
struct Cli {
    /// Seed the database with dev data (event, tiers, fee rule, API keys)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with a sample event for local testing.
/// Only runs in dev mode and prints the API keys once.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let event = queries::create_event(
        &conn,
        &CreateEvent {
            name: "Dev Night Live".to_string(),
            starts_at: chrono::Utc::now().timestamp() + 30 * 86400,
        },
    )
    .expect("Failed to create dev event");
    tracing::info!("Event: {} (id: {})", event.name, event.id);

    let general = queries::create_ticket_tier(
        &conn,
        &event.id,
        &CreateTicketTier {
            name: "Early Bird".to_string(),
            capacity: 100,
            price_cents: 2500,
            currency: "usd".to_string(),
            fee_flat_cents: None,
            fee_percentage_bps: None,
            display_order: 0,
            hide_until_previous_sold_out: false,
        },
    )
    .expect("Failed to create dev tier");

    let late = queries::create_ticket_tier(
        &conn,
        &event.id,
        &CreateTicketTier {
            name: "General Admission".to_string(),
            capacity: 400,
            price_cents: 3500,
            currency: "usd".to_string(),
            fee_flat_cents: None,
            fee_percentage_bps: None,
            display_order: 1,
            hide_until_previous_sold_out: true,
        },
    )
    .expect("Failed to create dev tier");
    tracing::info!("Tiers: {} ({}), {} ({})", general.name, general.id, late.name, late.id);

    let product = queries::create_product(
        &conn,
        &event.id,
        &CreateProduct {
            name: "Parking Pass".to_string(),
            price_cents: 1000,
            currency: "usd".to_string(),
        },
    )
    .expect("Failed to create dev product");

    queries::create_fee_rule(
        &conn,
        &CreateFeeRule {
            event_id: None,
            flat_cents: 99,
            percentage_bps: 300,
            position: 0,
        },
    )
    .expect("Failed to create site fee rule");

    let mut keys = Vec::new();
    for (user_id, role) in [
        ("dev-admin", ApiKeyRole::Admin),
        ("dev-scanner", ApiKeyRole::Scanner),
        ("dev-buyer", ApiKeyRole::Customer),
    ] {
        let (key, raw) = queries::create_api_key(
            &conn,
            &CreateApiKey {
                user_id: user_id.to_string(),
                name: format!("{} key", role.as_str()),
                role,
            },
        )
        .expect("Failed to create dev API key");
        keys.push((key.role, raw));
    }

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Copy-paste friendly output (no log formatting)
    println!();
    println!("--- COPY FROM HERE ---");
    for (role, raw) in &keys {
        println!("  {}_api_key: {}", role.as_str(), raw);
    }
    println!("  event_id: {}", event.id);
    println!("  tier_id: {}", general.id);
    println!("  product_id: {}", product.id);
    println!("--- END COPY ---");
    println!();
}

/// Spawns the background task that returns expired holds to inventory
/// and trims old webhook dedup records.
fn spawn_maintenance_task(state: AppState, sweep_interval_secs: u64, webhook_retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(sweep_interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            let mut conn = match state.db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to get db connection for maintenance: {}", e);
                    continue;
                }
            };

            match holds::sweep_expired_holds(&mut conn, chrono::Utc::now().timestamp()) {
                Ok(count) => {
                    if count > 0 {
                        tracing::debug!("Released {} expired holds", count);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to sweep expired holds: {}", e);
                }
            }

            if webhook_retention_days > 0 {
                match queries::purge_old_webhook_events(&conn, webhook_retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} webhook dedup records", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                }
            }
        }
    });

    tracing::info!(
        "Background maintenance task started (runs every {} seconds)",
        sweep_interval_secs
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    let payments: Arc<dyn PaymentGateway> = match config.stripe_secret_key {
        Some(ref key) => Arc::new(StripeClient::new(key)),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set - checkout will be unavailable");
            Arc::new(DisabledGateway)
        }
    };

    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set - webhooks will be rejected");
    }

    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        hold_ttl_secs: config.hold_ttl_secs,
        payment_session_ttl_secs: config.payment_session_ttl_secs,
        success_url: config.success_url.clone(),
        cancel_url: config.cancel_url.clone(),
        scan_signer: config.scan_signer.clone(),
        payments,
        stripe_webhook_secret: config.stripe_webhook_secret.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BOXOFFICE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_maintenance_task(
        state.clone(),
        config.hold_sweep_interval_secs,
        config.webhook_retention_days,
    );

    let app = Router::new()
        // Public endpoints (no auth)
        .merge(handlers::public::router())
        // Webhook endpoints (provider signature auth)
        .merge(handlers::webhooks::router())
        // Buyer and admin API (API key auth)
        .merge(handlers::orders::router(state.clone()))
        // Door scanning (API key auth, scanner role checked per request)
        .merge(handlers::checkin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let audit_path = config.audit_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("Boxoffice server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &audit_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            } else {
                tracing::info!("Removed {}", path);
            }
            // WAL and SHM files may not exist
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
