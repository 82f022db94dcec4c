//! Payment reconciliation: applies processor notifications to orders exactly once.
//!
//! Providers implement [`WebhookProvider`] for signature checks and payload
//! parsing; everything after that is provider-agnostic. Each event is handled
//! in one `IMMEDIATE` transaction that records the dedup row together with the
//! state change, so a retry after a crash either sees both or neither.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::holds;
use crate::issuance;
use crate::models::{Order, OrderItemKind, OrderStatus};

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Identifiers and details carried by a payment notification.
#[derive(Debug, Clone, Default)]
pub struct PaymentEventData {
    /// Provider's event id, the deduplication key
    pub event_id: String,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    /// Our order id, echoed back through provider metadata
    pub order_id: Option<String>,
    pub customer_email: Option<String>,
}

/// Parsed webhook event with provider-agnostic data.
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    /// Money captured for the order's session
    PaymentSucceeded(PaymentEventData),
    PaymentFailed(PaymentEventData),
    /// The buyer never paid and the processor closed the session
    SessionExpired(PaymentEventData),
    /// Full refund of a completed order
    Refunded(PaymentEventData),
    /// Event type not relevant to orders
    Ignored,
}

impl PaymentEvent {
    pub fn data(&self) -> Option<&PaymentEventData> {
        match self {
            Self::PaymentSucceeded(d)
            | Self::PaymentFailed(d)
            | Self::SessionExpired(d)
            | Self::Refunded(d) => Some(d),
            Self::Ignored => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded(_) => "payment_succeeded",
            Self::PaymentFailed(_) => "payment_failed",
            Self::SessionExpired(_) => "session_expired",
            Self::Refunded(_) => "refunded",
            Self::Ignored => "ignored",
        }
    }
}

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed { tickets_issued: usize },
    Failed,
    Expired,
    Refunded { tickets_refunded: usize },
    /// Paid, but the order's inventory is no longer held (a hold lapsed, or the
    /// order had already failed or expired). The payment needs a refund.
    HoldExpired,
    /// Duplicate delivery; nothing changed
    AlreadyProcessed,
    /// No order matches the event. Not recorded, so a retry can still apply.
    OrderNotFound,
    /// Recorded, but the order was not in a state this event applies to
    NoChange { status: OrderStatus },
    Ignored,
}

/// Trait for payment provider webhook handling.
pub trait WebhookProvider: Send + Sync {
    /// Provider name for logging and dedup records (e.g., "stripe")
    fn provider_name(&self) -> &'static str;

    /// Extract signature from request headers.
    fn extract_signature(&self, headers: &HeaderMap) -> std::result::Result<String, WebhookResult>;

    /// Verify the signature over the raw body.
    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> std::result::Result<bool, WebhookResult>;

    /// Parse the webhook payload into a provider-agnostic event.
    fn parse_event(&self, body: &Bytes) -> std::result::Result<PaymentEvent, WebhookResult>;
}

fn locate_order(conn: &Connection, data: &PaymentEventData) -> Result<Option<Order>> {
    if let Some(session_id) = &data.session_id {
        if let Some(order) = queries::get_order_by_payment_session_id(conn, session_id)? {
            return Ok(Some(order));
        }
    }
    if let Some(intent_id) = &data.payment_intent_id {
        if let Some(order) = queries::get_order_by_payment_intent_id(conn, intent_id)? {
            return Ok(Some(order));
        }
    }
    if let Some(order_id) = &data.order_id {
        return queries::get_order_by_id(conn, order_id);
    }
    Ok(None)
}

/// Apply one payment event.
///
/// Safe to call any number of times with the same event: only the first call
/// changes anything. Errors roll back everything including the dedup record,
/// so the provider's retry gets a clean second attempt.
pub fn process_payment_event(
    conn: &mut Connection,
    provider: &str,
    event: &PaymentEvent,
) -> Result<ReconcileOutcome> {
    let Some(data) = event.data() else {
        return Ok(ReconcileOutcome::Ignored);
    };

    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(order) = locate_order(&tx, data)? else {
        tracing::warn!(
            provider,
            event_id = %data.event_id,
            event = event.name(),
            "No order found for payment event"
        );
        return Ok(ReconcileOutcome::OrderNotFound);
    };

    if !queries::try_record_webhook_event(&tx, provider, &data.event_id)? {
        tracing::debug!(provider, event_id = %data.event_id, "Duplicate webhook event");
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let outcome = match (event, order.status) {
        (PaymentEvent::PaymentSucceeded(_), OrderStatus::Pending) => {
            complete_order(&mut tx, &order, data)?
        }
        (PaymentEvent::PaymentFailed(_), OrderStatus::Pending) => {
            let released = holds::release_holds_for_order(&tx, &order.id)?;
            queries::transition_order_status(&tx, &order.id, OrderStatus::Pending, OrderStatus::Failed)?;
            tracing::info!(order_id = %order.id, released, "Order failed");
            ReconcileOutcome::Failed
        }
        (PaymentEvent::SessionExpired(_), OrderStatus::Pending) => {
            let released = holds::release_holds_for_order(&tx, &order.id)?;
            queries::transition_order_status(&tx, &order.id, OrderStatus::Pending, OrderStatus::Expired)?;
            tracing::info!(order_id = %order.id, released, "Order expired");
            ReconcileOutcome::Expired
        }
        (PaymentEvent::PaymentSucceeded(_), status @ (OrderStatus::Failed | OrderStatus::Expired)) => {
            // Holds were already released; the money has to go back
            tracing::warn!(
                order_id = %order.id,
                payment_intent_id = ?data.payment_intent_id,
                status = %status,
                "Payment succeeded for an order that is no longer pending, needs a refund"
            );
            ReconcileOutcome::HoldExpired
        }
        (PaymentEvent::Refunded(_), OrderStatus::Completed) => {
            queries::transition_order_status(
                &tx,
                &order.id,
                OrderStatus::Completed,
                OrderStatus::Refunded,
            )?;
            let tickets_refunded = queries::refund_valid_tickets_for_order(&tx, &order.id)?;
            tracing::info!(order_id = %order.id, tickets_refunded, "Order refunded");
            ReconcileOutcome::Refunded { tickets_refunded }
        }
        (_, status) => {
            tracing::info!(
                order_id = %order.id,
                event = event.name(),
                status = %status,
                "Payment event does not apply to order state, recorded without change"
            );
            ReconcileOutcome::NoChange { status }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

/// Promote every hold, complete the order and issue tickets, all or nothing.
///
/// A lapsed hold rolls the promotions back; the order then expires and its
/// remaining holds are released.
fn complete_order(
    tx: &mut rusqlite::Transaction<'_>,
    order: &Order,
    data: &PaymentEventData,
) -> Result<ReconcileOutcome> {
    let now = Utc::now().timestamp();
    let items = queries::get_order_items(tx, &order.id)?;

    let sp = tx.savepoint()?;
    let mut lapsed = None;
    for item in items.iter().filter(|i| i.kind == OrderItemKind::Ticket) {
        let hold_id = item.hold_id.as_deref().ok_or_else(|| {
            AppError::Internal(format!("Ticket item {} has no hold", item.id))
        })?;
        match holds::promote_hold(&sp, hold_id, now) {
            Ok(_) => {}
            Err(AppError::HoldExpired(reason)) => {
                lapsed = Some(reason);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(reason) = lapsed {
        // Dropping the savepoint rolls back the promotions made so far
        drop(sp);
        let released = holds::release_holds_for_order(tx, &order.id)?;
        queries::transition_order_status(tx, &order.id, OrderStatus::Pending, OrderStatus::Expired)?;
        tracing::warn!(
            order_id = %order.id,
            payment_intent_id = ?data.payment_intent_id,
            released,
            "Payment succeeded after hold lapsed, order expired and needs a refund: {}",
            reason
        );
        return Ok(ReconcileOutcome::HoldExpired);
    }

    queries::complete_order(
        &sp,
        &order.id,
        data.payment_intent_id.as_deref(),
        data.customer_email.as_deref(),
    )?;
    let completed = queries::get_order_by_id(&sp, &order.id)?
        .ok_or_else(|| AppError::Internal(format!("Order {} vanished", order.id)))?;
    let tickets = issuance::issue_tickets(&sp, &completed)?;
    sp.commit()?;

    tracing::info!(
        order_id = %order.id,
        tickets = tickets.len(),
        "Order completed"
    );
    Ok(ReconcileOutcome::Completed {
        tickets_issued: tickets.len(),
    })
}

fn to_webhook_result(outcome: &ReconcileOutcome) -> WebhookResult {
    match outcome {
        ReconcileOutcome::AlreadyProcessed => (StatusCode::OK, "Already processed"),
        ReconcileOutcome::OrderNotFound => (StatusCode::OK, "Order not found"),
        ReconcileOutcome::HoldExpired => (StatusCode::OK, "Hold expired"),
        ReconcileOutcome::NoChange { .. } => (StatusCode::OK, "No change"),
        ReconcileOutcome::Ignored => (StatusCode::OK, "Event ignored"),
        ReconcileOutcome::Completed { .. }
        | ReconcileOutcome::Failed
        | ReconcileOutcome::Expired
        | ReconcileOutcome::Refunded { .. } => (StatusCode::OK, "OK"),
    }
}

/// Generic webhook handler that delegates to provider-specific implementations.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match provider.extract_signature(&headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    match provider.verify_signature(state, &body, &signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => return e,
    }

    let event = match provider.parse_event(&body) {
        Ok(e) => e,
        Err(e) => return e,
    };

    if matches!(event, PaymentEvent::Ignored) {
        return (StatusCode::OK, "Event ignored");
    }

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match process_payment_event(&mut conn, provider.provider_name(), &event) {
        Ok(outcome) => to_webhook_result(&outcome),
        Err(e) => {
            // 5xx so the provider retries; the dedup row rolled back with everything else
            tracing::error!(
                provider = provider.provider_name(),
                "Failed to process payment event: {}",
                e
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing error")
        }
    }
}
