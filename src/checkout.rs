//! Checkout orchestration: cart validation, holds, pricing, the pending order
//! and the payment session.
//!
//! Holds are taken in ascending tier-id order so two carts that share tiers
//! always lock them in the same order. Anything that fails once holds exist
//! releases them before the error is returned; a failure after the order row
//! exists also marks the order `failed`.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::fees::{self, LineFees};
use crate::holds;
use crate::models::{
    CreateOrder, CreateOrderItem, Hold, Order, OrderItem, OrderItemKind, OrderStatus, Product,
    TicketTier,
};
use crate::payments::{CheckoutSessionRequest, SessionLineItem};

/// Upper bound on units per cart line (after merging duplicate lines).
pub const MAX_TICKETS_PER_LINE: i64 = 20;

/// Fee line label on the processor's checkout page
const FEES_LINE_NAME: &str = "Service fees";

#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    #[serde(default)]
    pub tier_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Authenticated user id; owns the holds
    pub buyer_id: String,
    pub event_id: String,
    pub items: Vec<CartLine>,
    pub fingerprint: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub session_id: String,
    pub checkout_url: String,
    pub expires_at: i64,
    pub currency: String,
    pub subtotal_cents: i64,
    pub fees_cents: i64,
    pub total_cents: i64,
}

/// Cart after validation: duplicate lines merged, tiers in lock order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidatedCart {
    pub tiers: BTreeMap<String, i64>,
    pub products: BTreeMap<String, i64>,
}

/// Check the cart's shape without touching the database.
pub fn validate_cart(items: &[CartLine]) -> Result<ValidatedCart> {
    if items.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_CART.into()));
    }

    let mut cart = ValidatedCart::default();
    for line in items {
        if !(1..=MAX_TICKETS_PER_LINE).contains(&line.quantity) {
            return Err(AppError::BadRequest(msg::INVALID_QUANTITY.into()));
        }

        let (bucket, id) = match (&line.tier_id, &line.product_id) {
            (Some(tier_id), None) => (&mut cart.tiers, tier_id),
            (None, Some(product_id)) => (&mut cart.products, product_id),
            _ => return Err(AppError::BadRequest(msg::AMBIGUOUS_LINE_ITEM.into())),
        };

        let quantity = bucket.entry(id.clone()).or_insert(0);
        *quantity += line.quantity;
        if *quantity > MAX_TICKETS_PER_LINE {
            return Err(AppError::BadRequest(msg::INVALID_QUANTITY.into()));
        }
    }

    Ok(cart)
}

/// Whether a tier is on sale given the other tiers of its event (in display order).
///
/// A tier flagged `hide_until_previous_sold_out` only shows once the tier right
/// before it has nothing left to sell.
pub fn is_tier_visible(tier: &TicketTier, event_tiers: &[TicketTier]) -> bool {
    if !tier.hide_until_previous_sold_out {
        return true;
    }

    match event_tiers.iter().position(|t| t.id == tier.id) {
        Some(0) | None => true,
        Some(index) => event_tiers[index - 1].available == 0,
    }
}

/// A priced cart line, ready to become an order item.
struct PricedLine {
    kind: OrderItemKind,
    ref_id: String,
    name: String,
    quantity: i64,
    unit_price_cents: i64,
    fees: LineFees,
}

/// Load and check every referenced tier and product, then price the lines.
fn price_cart(conn: &Connection, event_id: &str, cart: &ValidatedCart) -> Result<(String, Vec<PricedLine>)> {
    queries::get_event_by_id(conn, event_id)?.or_not_found(msg::EVENT_NOT_FOUND)?;

    let event_tiers = queries::list_ticket_tiers_for_event(conn, event_id)?;
    let event_rules = queries::list_fee_rules_for_event(conn, event_id)?;
    let site_rules = queries::list_site_fee_rules(conn)?;

    let mut currency: Option<String> = None;
    let mut check_currency = |c: &str| -> Result<()> {
        match &currency {
            Some(existing) if !existing.eq_ignore_ascii_case(c) => {
                Err(AppError::BadRequest(msg::MIXED_CURRENCY.into()))
            }
            Some(_) => Ok(()),
            None => {
                currency = Some(c.to_lowercase());
                Ok(())
            }
        }
    };

    let mut lines = Vec::with_capacity(cart.tiers.len() + cart.products.len());

    for (tier_id, &quantity) in &cart.tiers {
        let tier: TicketTier =
            queries::get_ticket_tier_by_id(conn, tier_id)?.or_not_found(msg::TIER_NOT_FOUND)?;
        if tier.event_id != event_id {
            return Err(AppError::BadRequest(msg::TIER_NOT_IN_EVENT.into()));
        }
        if !is_tier_visible(&tier, &event_tiers) {
            return Err(AppError::BadRequest(msg::TIER_NOT_VISIBLE.into()));
        }
        check_currency(&tier.currency)?;

        let entries = fees::resolve_fee_entries(&tier, &event_rules, &site_rules);
        let fees = fees::calculate_line_fees(tier.price_cents, quantity, &entries)?;
        lines.push(PricedLine {
            kind: OrderItemKind::Ticket,
            ref_id: tier.id,
            name: tier.name,
            quantity,
            unit_price_cents: tier.price_cents,
            fees,
        });
    }

    for (product_id, &quantity) in &cart.products {
        let product: Product =
            queries::get_product_by_id(conn, product_id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
        if product.event_id != event_id {
            return Err(AppError::BadRequest(msg::PRODUCT_NOT_IN_EVENT.into()));
        }
        if !product.active {
            return Err(AppError::BadRequest(format!("{} is not available", product.name)));
        }
        check_currency(&product.currency)?;

        // Products carry no fees
        let fees = fees::calculate_line_fees(product.price_cents, quantity, &[])?;
        lines.push(PricedLine {
            kind: OrderItemKind::Product,
            ref_id: product.id,
            name: product.name,
            quantity,
            unit_price_cents: product.price_cents,
            fees,
        });
    }

    let currency = currency.ok_or_else(|| AppError::BadRequest(msg::EMPTY_CART.into()))?;
    Ok((currency, lines))
}

fn checked_sum(mut values: impl Iterator<Item = i64>) -> Result<i64> {
    values
        .try_fold(0i64, |acc, v| acc.checked_add(v))
        .ok_or_else(|| AppError::BadRequest(msg::AMOUNT_OVERFLOW.into()))
}

/// Release holds taken by a checkout that is being abandoned.
fn release_all(conn: &mut Connection, created: &[Hold]) {
    for hold in created {
        if let Err(e) = holds::release_hold(conn, &hold.id) {
            // The sweeper picks it up once the TTL runs out
            tracing::warn!(hold_id = %hold.id, "Failed to release hold during rollback: {}", e);
        }
    }
}

/// Undo a checkout whose order row already exists.
fn fail_order(state: &AppState, order_id: &str) {
    let result = state.db.get().map_err(AppError::from).and_then(|mut conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        holds::release_holds_for_order(&tx, order_id)?;
        queries::transition_order_status(&tx, order_id, OrderStatus::Pending, OrderStatus::Failed)?;
        tx.commit()?;
        Ok(())
    });

    if let Err(e) = result {
        tracing::error!(order_id, "Failed to roll back checkout: {}", e);
    }
}

/// Run a checkout end to end and hand back where to send the buyer.
pub async fn checkout(state: &AppState, request: CheckoutRequest) -> Result<CheckoutResponse> {
    let cart = validate_cart(&request.items)?;

    let (order, items, currency) = {
        let mut conn = state.db.get()?;
        let (currency, lines) = price_cart(&conn, &request.event_id, &cart)?;

        // Lines are in tier-id order already (BTreeMap), which is the lock order
        let mut created: Vec<Hold> = Vec::new();
        for line in lines.iter().filter(|l| l.kind == OrderItemKind::Ticket) {
            match holds::create_hold(
                &mut conn,
                &line.ref_id,
                line.quantity,
                &request.buyer_id,
                request.fingerprint.as_deref(),
                state.hold_ttl_secs,
            ) {
                Ok(hold) => created.push(hold),
                Err(e) => {
                    release_all(&mut conn, &created);
                    tracing::info!(
                        event_id = %request.event_id,
                        tier_id = %line.ref_id,
                        "Checkout rejected: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        let persisted = persist_order(&mut conn, &request, &currency, &lines, &created);
        match persisted {
            Ok((order, items)) => (order, items, currency),
            Err(e) => {
                release_all(&mut conn, &created);
                return Err(e);
            }
        }
    };

    let session_expires_at = Utc::now().timestamp() + state.payment_session_ttl_secs;
    let mut line_items: Vec<SessionLineItem> = items
        .iter()
        .map(|item| SessionLineItem {
            name: item.1.clone(),
            unit_amount_cents: item.0.unit_price_cents,
            quantity: item.0.quantity,
        })
        .collect();
    if order.fees_cents > 0 {
        line_items.push(SessionLineItem {
            name: FEES_LINE_NAME.to_string(),
            unit_amount_cents: order.fees_cents,
            quantity: 1,
        });
    }

    let session_request = CheckoutSessionRequest {
        order_id: order.id.clone(),
        currency: currency.clone(),
        line_items,
        customer_email: request.email.clone(),
        success_url: state.success_url.clone(),
        cancel_url: state.cancel_url.clone(),
        expires_at: session_expires_at,
    };

    let session = match state.payments.create_checkout_session(&session_request).await {
        Ok(session) => session,
        Err(e) => {
            fail_order(state, &order.id);
            return Err(match e {
                AppError::PaymentSubsystemUnavailable(_) => e,
                other => AppError::PaymentSubsystemUnavailable(other.to_string()),
            });
        }
    };

    let recorded = state.db.get().map_err(AppError::from).and_then(|conn| {
        queries::set_order_payment_session(&conn, &order.id, &session.session_id, session_expires_at)
    });
    match recorded {
        Ok(true) => {}
        Ok(false) => {
            // Only a pending order takes a session; something else already moved it
            fail_order(state, &order.id);
            return Err(AppError::Conflict(format!(
                "Order {} is no longer pending",
                order.id
            )));
        }
        Err(e) => {
            fail_order(state, &order.id);
            return Err(e);
        }
    }

    tracing::info!(
        order_id = %order.id,
        session_id = %session.session_id,
        provider = state.payments.provider_name(),
        total_cents = order.total_cents,
        "Checkout session opened"
    );

    Ok(CheckoutResponse {
        order_id: order.id,
        session_id: session.session_id,
        checkout_url: session.checkout_url,
        expires_at: session_expires_at,
        currency,
        subtotal_cents: order.subtotal_cents,
        fees_cents: order.fees_cents,
        total_cents: order.total_cents,
    })
}

/// Insert the pending order and its items in one transaction.
/// Returns each item alongside its display name.
fn persist_order(
    conn: &mut Connection,
    request: &CheckoutRequest,
    currency: &str,
    lines: &[PricedLine],
    created: &[Hold],
) -> Result<(Order, Vec<(OrderItem, String)>)> {
    let subtotal_cents = checked_sum(lines.iter().map(|l| l.fees.subtotal_cents))?;
    let fees_cents = checked_sum(lines.iter().map(|l| l.fees.fees_cents))?;
    let total_cents = subtotal_cents
        .checked_add(fees_cents)
        .ok_or_else(|| AppError::BadRequest(msg::AMOUNT_OVERFLOW.into()))?;

    let items: Vec<CreateOrderItem> = lines
        .iter()
        .map(|line| match line.kind {
            OrderItemKind::Ticket => CreateOrderItem {
                kind: OrderItemKind::Ticket,
                tier_id: Some(line.ref_id.clone()),
                product_id: None,
                hold_id: created
                    .iter()
                    .find(|h| h.tier_id == line.ref_id)
                    .map(|h| h.id.clone()),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                unit_fee_cents: line.fees.unit_fee_cents,
                fees_cents: line.fees.fees_cents,
            },
            OrderItemKind::Product => CreateOrderItem {
                kind: OrderItemKind::Product,
                tier_id: None,
                product_id: Some(line.ref_id.clone()),
                hold_id: None,
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                unit_fee_cents: 0,
                fees_cents: 0,
            },
        })
        .collect();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (order, order_items) = queries::create_order(
        &tx,
        &CreateOrder {
            buyer_id: request.buyer_id.clone(),
            buyer_email: request.email.clone(),
            event_id: request.event_id.clone(),
            currency: currency.to_string(),
            subtotal_cents,
            fees_cents,
            total_cents,
        },
        &items,
    )?;
    tx.commit()?;

    let named = order_items
        .into_iter()
        .zip(lines.iter().map(|l| l.name.clone()))
        .collect();
    Ok((order, named))
}
