//! Test utilities and fixtures for boxoffice integration tests

#![allow(dead_code, unused_imports)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use futures::future::BoxFuture;
use rusqlite::Connection;
use tempfile::TempDir;

pub use boxoffice::checkin::{CheckinResult, RejectReason, ScanContext};
pub use boxoffice::checkout::{CartLine, CheckoutRequest, CheckoutResponse};
pub use boxoffice::crypto::ScanTokenSigner;
pub use boxoffice::db::{AppState, create_pool, init_audit_db, init_db, queries};
pub use boxoffice::error::{AppError, Result};
pub use boxoffice::handlers::webhooks::common::{
    PaymentEvent, PaymentEventData, ReconcileOutcome, process_payment_event,
};
pub use boxoffice::models::*;
pub use boxoffice::payments::{
    CheckoutSessionCreated, CheckoutSessionRequest, PaymentGateway, compute_signature,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_HOLD_TTL_SECS: i64 = 600;

/// Fixed signing key (ONLY for testing!)
pub fn test_signer() -> ScanTokenSigner {
    ScanTokenSigner::from_bytes([7u8; 32])
}

/// Payment processor stand-in. Counts sessions and can be told to fail.
#[derive(Default)]
pub struct MockGateway {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub last_request: Mutex<Option<CheckoutSessionRequest>>,
}

impl MockGateway {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CheckoutSessionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl PaymentGateway for MockGateway {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn create_checkout_session<'a>(
        &'a self,
        request: &'a CheckoutSessionRequest,
    ) -> BoxFuture<'a, Result<CheckoutSessionCreated>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_request.lock().unwrap() = Some(request.clone());

            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::PaymentSubsystemUnavailable(
                    "mock processor down".into(),
                ));
            }

            Ok(CheckoutSessionCreated {
                session_id: format!("cs_test_{}_{}", n, request.order_id),
                checkout_url: format!("https://checkout.test/pay/{}", n),
            })
        })
    }
}

/// App state backed by a throwaway database file, so every pooled
/// connection (and every thread) sees the same data.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    _dir: TempDir,
}

impl TestApp {
    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get test connection")
    }

    pub fn audit_conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.audit.get().expect("Failed to get audit connection")
    }

    /// Full router, as served by the binary.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(boxoffice::handlers::public::router())
            .merge(boxoffice::handlers::webhooks::router())
            .merge(boxoffice::handlers::orders::router(self.state.clone()))
            .merge(boxoffice::handlers::checkin::router(self.state.clone()))
            .with_state(self.state.clone())
    }
}

pub fn create_test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let db_path = dir.path().join("boxoffice.db");
    let audit_path = dir.path().join("boxoffice_audit.db");

    let pool = create_pool(db_path.to_str().unwrap()).expect("Failed to create pool");
    init_db(&pool.get().unwrap()).expect("Failed to initialize schema");

    let audit = create_pool(audit_path.to_str().unwrap()).expect("Failed to create audit pool");
    init_audit_db(&audit.get().unwrap()).expect("Failed to initialize audit schema");

    let gateway = Arc::new(MockGateway::default());

    let state = AppState {
        db: pool,
        audit,
        hold_ttl_secs: TEST_HOLD_TTL_SECS,
        payment_session_ttl_secs: TEST_HOLD_TTL_SECS,
        success_url: "http://localhost:3000/success".to_string(),
        cancel_url: "http://localhost:3000/cancel".to_string(),
        scan_signer: test_signer(),
        payments: gateway.clone(),
        stripe_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
    };

    TestApp {
        state,
        gateway,
        _dir: dir,
    }
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

// ============ Fixtures ============

pub fn create_test_event(conn: &Connection, name: &str) -> Event {
    queries::create_event(
        conn,
        &CreateEvent {
            name: name.to_string(),
            starts_at: chrono::Utc::now().timestamp() + 86400,
        },
    )
    .expect("Failed to create test event")
}

pub fn create_test_tier(
    conn: &Connection,
    event_id: &str,
    name: &str,
    capacity: i64,
    price_cents: i64,
) -> TicketTier {
    queries::create_ticket_tier(
        conn,
        event_id,
        &CreateTicketTier {
            name: name.to_string(),
            capacity,
            price_cents,
            currency: "usd".to_string(),
            fee_flat_cents: None,
            fee_percentage_bps: None,
            display_order: 0,
            hide_until_previous_sold_out: false,
        },
    )
    .expect("Failed to create test tier")
}

pub fn create_test_product(conn: &Connection, event_id: &str, name: &str, price_cents: i64) -> Product {
    queries::create_product(
        conn,
        event_id,
        &CreateProduct {
            name: name.to_string(),
            price_cents,
            currency: "usd".to_string(),
        },
    )
    .expect("Failed to create test product")
}

pub fn create_test_fee_rule(
    conn: &Connection,
    event_id: Option<&str>,
    flat_cents: i64,
    percentage_bps: i64,
) -> FeeRule {
    queries::create_fee_rule(
        conn,
        &CreateFeeRule {
            event_id: event_id.map(String::from),
            flat_cents,
            percentage_bps,
            position: 0,
        },
    )
    .expect("Failed to create test fee rule")
}

/// Returns the stored key and the raw bearer secret.
pub fn create_test_api_key(conn: &Connection, user_id: &str, role: ApiKeyRole) -> (ApiKey, String) {
    queries::create_api_key(
        conn,
        &CreateApiKey {
            user_id: user_id.to_string(),
            name: format!("{} test key", role.as_str()),
            role,
        },
    )
    .expect("Failed to create test API key")
}

pub fn counters(conn: &Connection, tier_id: &str) -> TierCounters {
    queries::get_tier_counters(conn, tier_id)
        .unwrap()
        .expect("tier should exist")
}

pub fn tier_line(tier_id: &str, quantity: i64) -> CartLine {
    CartLine {
        tier_id: Some(tier_id.to_string()),
        product_id: None,
        quantity,
    }
}

pub fn product_line(product_id: &str, quantity: i64) -> CartLine {
    CartLine {
        tier_id: None,
        product_id: Some(product_id.to_string()),
        quantity,
    }
}

pub fn checkout_request(buyer_id: &str, event_id: &str, items: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        buyer_id: buyer_id.to_string(),
        event_id: event_id.to_string(),
        items,
        fingerprint: None,
        email: Some(format!("{}@example.com", buyer_id)),
    }
}

pub fn scanner_context(operator_id: &str) -> ScanContext {
    ScanContext {
        operator_id: operator_id.to_string(),
        role: ApiKeyRole::Scanner,
        device_id: Some("gate-1".to_string()),
        location: Some("North entrance".to_string()),
        ip_address: None,
        user_agent: None,
    }
}

// ============ Payment events ============

pub fn event_data(event_id: &str, response: &CheckoutResponse) -> PaymentEventData {
    PaymentEventData {
        event_id: event_id.to_string(),
        session_id: Some(response.session_id.clone()),
        payment_intent_id: Some(format!("pi_{}", response.order_id)),
        order_id: Some(response.order_id.clone()),
        customer_email: None,
    }
}

pub fn payment_succeeded(event_id: &str, response: &CheckoutResponse) -> PaymentEvent {
    PaymentEvent::PaymentSucceeded(event_data(event_id, response))
}

pub fn payment_failed(event_id: &str, response: &CheckoutResponse) -> PaymentEvent {
    PaymentEvent::PaymentFailed(event_data(event_id, response))
}

pub fn refunded(event_id: &str, response: &CheckoutResponse) -> PaymentEvent {
    PaymentEvent::Refunded(PaymentEventData {
        session_id: None,
        ..event_data(event_id, response)
    })
}

pub fn reconcile(app: &TestApp, event: &PaymentEvent) -> ReconcileOutcome {
    let mut conn = app.conn();
    process_payment_event(&mut conn, "stripe", event).expect("reconciliation should not error")
}

/// Value for the `stripe-signature` header, timestamped now.
pub fn stripe_signature_header(payload: &[u8], secret: &str) -> String {
    stripe_signature_header_at(payload, secret, chrono::Utc::now().timestamp())
}

pub fn stripe_signature_header_at(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let timestamp = timestamp.to_string();
    let signature = compute_signature(secret, &timestamp, payload).unwrap();
    format!("t={},v1={}", timestamp, signature)
}

/// Body of a paid `checkout.session.completed` event.
pub fn stripe_session_completed(event_id: &str, response: &CheckoutResponse) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": response.session_id,
                "payment_status": "paid",
                "payment_intent": format!("pi_{}", response.order_id),
                "customer_details": { "email": "buyer@example.com" },
                "metadata": { "order_id": response.order_id }
            }
        }
    })
    .to_string()
}

/// Force a hold past its expiry without waiting.
pub fn expire_hold(conn: &Connection, hold_id: &str) {
    conn.execute(
        "UPDATE holds SET expires_at = ?2 WHERE id = ?1",
        rusqlite::params![hold_id, chrono::Utc::now().timestamp() - 1],
    )
    .unwrap();
}

/// Hold ids backing an order's ticket items.
pub fn order_hold_ids(conn: &Connection, order_id: &str) -> Vec<String> {
    queries::get_order_items(conn, order_id)
        .unwrap()
        .into_iter()
        .filter_map(|item| item.hold_id)
        .collect()
}

// ============ Flows ============

/// Check out `quantity` tickets and deliver a successful payment for them.
pub async fn purchase(
    app: &TestApp,
    buyer_id: &str,
    event_id: &str,
    tier_id: &str,
    quantity: i64,
) -> (CheckoutResponse, Vec<Ticket>) {
    let response = boxoffice::checkout::checkout(
        &app.state,
        checkout_request(buyer_id, event_id, vec![tier_line(tier_id, quantity)]),
    )
    .await
    .expect("checkout should succeed");

    let outcome = reconcile(app, &payment_succeeded(&format!("evt_paid_{}", response.order_id), &response));
    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            tickets_issued: quantity as usize
        }
    );

    let tickets = queries::list_tickets_for_order(&app.conn(), &response.order_id).unwrap();
    (response, tickets)
}

pub fn order_status(conn: &Connection, order_id: &str) -> OrderStatus {
    queries::get_order_by_id(conn, order_id)
        .unwrap()
        .expect("order should exist")
        .status
}
