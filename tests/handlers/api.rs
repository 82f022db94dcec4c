//! Integration tests for the authenticated API: checkout, orders, tickets, check-in.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

#[path = "../common/mod.rs"]
mod common;
use common::*;

struct Fixture {
    app: TestApp,
    event: Event,
    tier: TicketTier,
    buyer_key: String,
    other_key: String,
    scanner_key: String,
    admin_key: String,
}

fn fixture() -> Fixture {
    let app = create_test_app();
    let fixture = {
        let conn = app.conn();
        let event = create_test_event(&conn, "API Night");
        let tier = create_test_tier(&conn, &event.id, "GA", 10, 2500);
        let (_, buyer_key) = create_test_api_key(&conn, "buyer-1", ApiKeyRole::Customer);
        let (_, other_key) = create_test_api_key(&conn, "buyer-2", ApiKeyRole::Customer);
        let (_, scanner_key) = create_test_api_key(&conn, "door-1", ApiKeyRole::Scanner);
        let (_, admin_key) = create_test_api_key(&conn, "admin-1", ApiKeyRole::Admin);
        (event, tier, buyer_key, other_key, scanner_key, admin_key)
    };
    let (event, tier, buyer_key, other_key, scanner_key, admin_key) = fixture;
    Fixture {
        app,
        event,
        tier,
        buyer_key,
        other_key,
        scanner_key,
        admin_key,
    }
}

async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<String>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn post_checkout(f: &Fixture, key: &str, quantity: i64) -> (StatusCode, Value) {
    let body = json!({
        "event_id": f.event.id,
        "items": [{ "tier_id": f.tier.id, "quantity": quantity }],
        "fingerprint": "fp-123"
    });
    send(&f.app, "POST", "/checkout", Some(key), Some(body.to_string())).await
}

/// Checkout through the API and settle it with a payment event.
async fn paid_order(f: &Fixture, quantity: i64) -> String {
    let (status, json) = post_checkout(f, &f.buyer_key, quantity).await;
    assert_eq!(status, StatusCode::OK);

    let order_id = json["order_id"].as_str().unwrap().to_string();
    let event = PaymentEvent::PaymentSucceeded(PaymentEventData {
        event_id: format!("evt_{}", order_id),
        session_id: json["session_id"].as_str().map(String::from),
        payment_intent_id: None,
        order_id: Some(order_id.clone()),
        customer_email: None,
    });
    assert!(matches!(
        reconcile(&f.app, &event),
        ReconcileOutcome::Completed { .. }
    ));
    order_id
}

// ============ Health ============

#[tokio::test]
async fn test_health() {
    let f = fixture();
    let (status, json) = send(&f.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ============ Checkout ============

#[tokio::test]
async fn test_checkout_requires_api_key() {
    let f = fixture();
    let body = json!({ "event_id": f.event.id, "items": [] }).to_string();

    let (status, _) = send(&f.app, "POST", "/checkout", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&f.app, "POST", "/checkout", Some("bx_not_a_real_key"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_checkout_returns_session() {
    let f = fixture();
    let (status, json) = post_checkout(&f, &f.buyer_key, 2).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["order_id"].as_str().unwrap().starts_with("bx_ord_"));
    assert!(json["checkout_url"].as_str().unwrap().starts_with("https://"));
    assert_eq!(json["subtotal_cents"], 5000);
    assert_eq!(json["total_cents"], 5000);

    let conn = f.app.conn();
    let order = queries::get_order_by_id(&conn, json["order_id"].as_str().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(order.buyer_id, "buyer-1", "buyer comes from the API key");
    assert_eq!(counters(&conn, &f.tier.id).reserved, 2);
}

#[tokio::test]
async fn test_checkout_validation_errors() {
    let f = fixture();

    let empty = json!({ "event_id": f.event.id, "items": [] }).to_string();
    let (status, json) = send(&f.app, "POST", "/checkout", Some(&f.buyer_key), Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Bad request");

    let (status, _) = send(
        &f.app,
        "POST",
        "/checkout",
        Some(&f.buyer_key),
        Some("{not json".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = post_checkout(&f, &f.buyer_key, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["details"].is_string());
}

#[tokio::test]
async fn test_checkout_sold_out() {
    let f = fixture();
    let (status, _) = post_checkout(&f, &f.buyer_key, 10).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post_checkout(&f, &f.other_key, 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Insufficient inventory");
}

#[tokio::test]
async fn test_checkout_processor_down() {
    let f = fixture();
    f.app.gateway.set_failing(true);

    let (status, json) = post_checkout(&f, &f.buyer_key, 1).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Payment subsystem unavailable");
    assert_eq!(counters(&f.app.conn(), &f.tier.id).reserved, 0);
}

#[tokio::test]
async fn test_revoked_key_is_rejected() {
    let f = fixture();
    let (key, raw) = create_test_api_key(&f.app.conn(), "buyer-3", ApiKeyRole::Customer);
    assert!(queries::revoke_api_key(&f.app.conn(), &key.id).unwrap());

    let (status, _) = post_checkout(&f, &raw, 1).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============ Orders ============

#[tokio::test]
async fn test_buyer_sees_order_with_scan_payloads() {
    let f = fixture();
    let order_id = paid_order(&f, 2).await;

    let uri = format!("/orders/{}", order_id);
    let (status, json) = send(&f.app, "GET", &uri, Some(&f.buyer_key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["items"].as_array().unwrap().len(), 1);

    let tickets = json["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 2);
    for ticket in tickets {
        assert!(ticket["scan_payload"].is_string());
        assert!(ticket.get("scan_token").is_none(), "raw token is never serialized");
    }
}

#[tokio::test]
async fn test_other_buyer_cannot_see_order() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;

    let uri = format!("/orders/{}", order_id);
    let (status, _) = send(&f.app, "GET", &uri, Some(&f.other_key), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_sees_order_without_payloads() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;

    let uri = format!("/orders/{}", order_id);
    let (status, json) = send(&f.app, "GET", &uri, Some(&f.admin_key), None).await;
    assert_eq!(status, StatusCode::OK);
    let tickets = json["tickets"].as_array().unwrap();
    assert!(tickets[0].get("scan_payload").is_none());
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let f = fixture();
    let (status, json) = send(
        &f.app,
        "GET",
        "/orders/bx_ord_missing",
        Some(&f.buyer_key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["details"], "Order not found");
}

// ============ Ticket cancellation ============

#[tokio::test]
async fn test_cancel_ticket_requires_admin() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;
    let ticket = queries::list_tickets_for_order(&f.app.conn(), &order_id).unwrap().remove(0);
    let uri = format!("/tickets/{}/cancel", ticket.id);

    let (status, _) = send(&f.app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&f.app, "POST", &uri, Some(&f.buyer_key), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(&f.app, "POST", &uri, Some(&f.admin_key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");

    let (status, json) = send(&f.app, "POST", &uri, Some(&f.admin_key), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "Invalid ticket state");
}

// ============ Check-in ============

async fn post_checkin(f: &Fixture, key: Option<&str>, token: &str) -> (StatusCode, Value) {
    let body = json!({
        "token": token,
        "event_id": f.event.id,
        "device_id": "gate-7",
        "location": "Main door"
    });
    send(&f.app, "POST", "/checkin", key, Some(body.to_string())).await
}

#[tokio::test]
async fn test_checkin_requires_api_key() {
    let f = fixture();
    let (status, _) = post_checkin(&f, None, "anything").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_checkin_always_answers_ok() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;
    let ticket = queries::list_tickets_for_order(&f.app.conn(), &order_id).unwrap().remove(0);
    let payload = f.app.state.scan_signer.sign(&ticket.scan_token);

    let (status, json) = post_checkin(&f, Some(&f.scanner_key), &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
    assert_eq!(json["ticket"]["ticket_id"], ticket.id.as_str());
    assert!(json.get("reason").is_none());

    let (status, json) = post_checkin(&f, Some(&f.scanner_key), &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], false);
    assert_eq!(json["reason"], "already_used");

    let (status, json) = post_checkin(&f, Some(&f.scanner_key), "forged.token").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reason"], "invalid_qr");

    let (status, json) = post_checkin(&f, Some(&f.buyer_key), &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reason"], "permission_denied");
}

#[tokio::test]
async fn test_checkin_logs_scanner_details() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;
    let ticket = queries::list_tickets_for_order(&f.app.conn(), &order_id).unwrap().remove(0);
    let payload = f.app.state.scan_signer.sign(&ticket.scan_token);

    post_checkin(&f, Some(&f.scanner_key), &payload).await;

    let logs = queries::list_scan_logs_for_ticket(&f.app.audit_conn(), &ticket.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operator_id, "door-1");
    assert_eq!(logs[0].device_id.as_deref(), Some("gate-7"));
    assert_eq!(logs[0].location.as_deref(), Some("Main door"));
    assert_eq!(logs[0].result, "ok");
}

async fn post_checkin_as(f: &Fixture, key: &str, token: &str, scanner_id: &str) -> (StatusCode, Value) {
    let body = json!({
        "token": token,
        "event_id": f.event.id,
        "scanner_id": scanner_id,
        "device_id": "gate-7"
    });
    send(&f.app, "POST", "/checkin", Some(key), Some(body.to_string())).await
}

#[tokio::test]
async fn test_checkin_scanner_id_overrides_operator() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;
    let ticket = queries::list_tickets_for_order(&f.app.conn(), &order_id).unwrap().remove(0);
    let payload = f.app.state.scan_signer.sign(&ticket.scan_token);

    let (status, json) = post_checkin_as(&f, &f.scanner_key, &payload, "staff-42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);

    let logs = queries::list_scan_logs_for_ticket(&f.app.audit_conn(), &ticket.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operator_id, "staff-42");
    assert_eq!(logs[0].device_id.as_deref(), Some("gate-7"));
}

#[tokio::test]
async fn test_checkin_scanner_id_ignored_without_scan_role() {
    let f = fixture();
    let order_id = paid_order(&f, 1).await;
    let ticket = queries::list_tickets_for_order(&f.app.conn(), &order_id).unwrap().remove(0);
    let payload = f.app.state.scan_signer.sign(&ticket.scan_token);

    let (status, json) = post_checkin_as(&f, &f.buyer_key, &payload, "staff-42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reason"], "permission_denied");

    let operators: Vec<String> = {
        let conn = f.app.audit_conn();
        let mut stmt = conn
            .prepare("SELECT operator_id FROM scan_logs WHERE result = 'permission_denied'")
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap();
        rows
    };
    assert_eq!(operators, vec!["buyer-1".to_string()]);
}
