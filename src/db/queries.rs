use chrono::Utc;
use rusqlite::{Connection, params};

use crate::crypto::{generate_api_key, hash_secret};
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    API_KEY_COLS, EVENT_COLS, FEE_RULE_COLS, HOLD_COLS, ORDER_COLS, ORDER_ITEM_COLS,
    PRODUCT_COLS, SCAN_LOG_COLS, TICKET_COLS, TICKET_TIER_COLS, TIER_COUNTER_COLS, query_all,
    query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Events ============

pub fn create_event(conn: &Connection, input: &CreateEvent) -> Result<Event> {
    let id = EntityType::Event.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO events (id, name, starts_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &input.name, input.starts_at, now],
    )?;

    Ok(Event {
        id,
        name: input.name.clone(),
        starts_at: input.starts_at,
        created_at: now,
    })
}

pub fn get_event_by_id(conn: &Connection, id: &str) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

// ============ Ticket Tiers ============

pub fn create_ticket_tier(
    conn: &Connection,
    event_id: &str,
    input: &CreateTicketTier,
) -> Result<TicketTier> {
    if input.capacity < 0 {
        return Err(AppError::BadRequest("Capacity cannot be negative".into()));
    }

    let id = EntityType::TicketTier.gen_id();
    let now = now();

    // A new tier starts with everything available
    conn.execute(
        "INSERT INTO ticket_tiers (id, event_id, name, capacity, available, reserved, sold, price_cents, currency, fee_flat_cents, fee_percentage_bps, display_order, hide_until_previous_sold_out, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4, 0, 0, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            event_id,
            &input.name,
            input.capacity,
            input.price_cents,
            &input.currency,
            input.fee_flat_cents,
            input.fee_percentage_bps,
            input.display_order,
            input.hide_until_previous_sold_out as i32,
            now
        ],
    )?;

    Ok(TicketTier {
        id,
        event_id: event_id.to_string(),
        name: input.name.clone(),
        capacity: input.capacity,
        available: input.capacity,
        reserved: 0,
        sold: 0,
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        fee_flat_cents: input.fee_flat_cents,
        fee_percentage_bps: input.fee_percentage_bps,
        display_order: input.display_order,
        hide_until_previous_sold_out: input.hide_until_previous_sold_out,
        created_at: now,
    })
}

pub fn get_ticket_tier_by_id(conn: &Connection, id: &str) -> Result<Option<TicketTier>> {
    query_one(
        conn,
        &format!("SELECT {} FROM ticket_tiers WHERE id = ?1", TICKET_TIER_COLS),
        &[&id],
    )
}

/// All tiers of an event in display order.
pub fn list_ticket_tiers_for_event(conn: &Connection, event_id: &str) -> Result<Vec<TicketTier>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM ticket_tiers WHERE event_id = ?1 ORDER BY display_order, id",
            TICKET_TIER_COLS
        ),
        &[&event_id],
    )
}

pub fn get_tier_counters(conn: &Connection, tier_id: &str) -> Result<Option<TierCounters>> {
    query_one(
        conn,
        &format!("SELECT {} FROM ticket_tiers WHERE id = ?1", TIER_COUNTER_COLS),
        &[&tier_id],
    )
}

/// Move `qty` units from available to reserved. Returns false when fewer than
/// `qty` are available (or the tier doesn't exist); nothing changes in that case.
pub fn reserve_tier_units(conn: &Connection, tier_id: &str, qty: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ticket_tiers SET available = available - ?2, reserved = reserved + ?2
         WHERE id = ?1 AND available >= ?2",
        params![tier_id, qty],
    )?;
    Ok(affected > 0)
}

/// Move `qty` units from reserved back to available.
pub fn release_tier_units(conn: &Connection, tier_id: &str, qty: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ticket_tiers SET reserved = reserved - ?2, available = available + ?2
         WHERE id = ?1 AND reserved >= ?2",
        params![tier_id, qty],
    )?;
    Ok(affected > 0)
}

/// Move `qty` units from reserved to sold.
pub fn commit_tier_units(conn: &Connection, tier_id: &str, qty: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ticket_tiers SET reserved = reserved - ?2, sold = sold + ?2
         WHERE id = ?1 AND reserved >= ?2",
        params![tier_id, qty],
    )?;
    Ok(affected > 0)
}

// ============ Products ============

pub fn create_product(conn: &Connection, event_id: &str, input: &CreateProduct) -> Result<Product> {
    let id = EntityType::Product.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, event_id, name, price_cents, currency, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![&id, event_id, &input.name, input.price_cents, &input.currency, now],
    )?;

    Ok(Product {
        id,
        event_id: event_id.to_string(),
        name: input.name.clone(),
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        active: true,
        created_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn set_product_active(conn: &Connection, id: &str, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE products SET active = ?2 WHERE id = ?1",
        params![id, active as i32],
    )?;
    Ok(affected > 0)
}

// ============ Fee Rules ============

pub fn create_fee_rule(conn: &Connection, input: &CreateFeeRule) -> Result<FeeRule> {
    if input.flat_cents < 0 || input.percentage_bps < 0 {
        return Err(AppError::BadRequest("Fees cannot be negative".into()));
    }

    let id = EntityType::FeeRule.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO fee_rules (id, event_id, flat_cents, percentage_bps, position, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.event_id,
            input.flat_cents,
            input.percentage_bps,
            input.position,
            now
        ],
    )?;

    Ok(FeeRule {
        id,
        event_id: input.event_id.clone(),
        flat_cents: input.flat_cents,
        percentage_bps: input.percentage_bps,
        position: input.position,
        created_at: now,
    })
}

/// Fee rules configured for one event, in application order.
pub fn list_fee_rules_for_event(conn: &Connection, event_id: &str) -> Result<Vec<FeeRule>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM fee_rules WHERE event_id = ?1 ORDER BY position, created_at",
            FEE_RULE_COLS
        ),
        &[&event_id],
    )
}

/// Site-wide default fee rules (no event).
pub fn list_site_fee_rules(conn: &Connection) -> Result<Vec<FeeRule>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM fee_rules WHERE event_id IS NULL ORDER BY position, created_at",
            FEE_RULE_COLS
        ),
        &[],
    )
}

// ============ Holds ============

pub fn insert_hold(
    conn: &Connection,
    tier_id: &str,
    quantity: i64,
    owner_id: &str,
    fingerprint: Option<&str>,
    expires_at: i64,
    created_at: i64,
) -> Result<Hold> {
    let id = EntityType::Hold.gen_id();

    conn.execute(
        "INSERT INTO holds (id, tier_id, quantity, owner_id, fingerprint, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, tier_id, quantity, owner_id, fingerprint, expires_at, created_at],
    )?;

    Ok(Hold {
        id,
        tier_id: tier_id.to_string(),
        quantity,
        owner_id: owner_id.to_string(),
        fingerprint: fingerprint.map(String::from),
        expires_at,
        created_at,
    })
}

pub fn get_hold_by_id(conn: &Connection, id: &str) -> Result<Option<Hold>> {
    query_one(
        conn,
        &format!("SELECT {} FROM holds WHERE id = ?1", HOLD_COLS),
        &[&id],
    )
}

/// Atomically take ownership of a hold by deleting it.
///
/// Exactly one caller gets `Some` for a given hold; everyone after that
/// (a concurrent sweeper, a duplicate webhook) gets `None`.
pub fn claim_hold(conn: &Connection, id: &str) -> Result<Option<Hold>> {
    query_one(
        conn,
        &format!("DELETE FROM holds WHERE id = ?1 RETURNING {}", HOLD_COLS),
        &[&id],
    )
}

/// IDs of holds whose TTL has run out, oldest first.
pub fn list_expired_hold_ids(conn: &Connection, now: i64, limit: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM holds WHERE expires_at <= ?1 ORDER BY expires_at LIMIT ?2",
    )?;
    let ids = stmt
        .query_map(params![now, limit], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn count_holds_for_tier(conn: &Connection, tier_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM holds WHERE tier_id = ?1",
        params![tier_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Orders ============

/// Insert a pending order with its line items. Run inside the caller's transaction.
pub fn create_order(
    conn: &Connection,
    input: &CreateOrder,
    items: &[CreateOrderItem],
) -> Result<(Order, Vec<OrderItem>)> {
    let id = EntityType::Order.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO orders (id, buyer_id, buyer_email, event_id, currency, subtotal_cents, fees_cents, total_cents, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?9)",
        params![
            &id,
            &input.buyer_id,
            &input.buyer_email,
            &input.event_id,
            &input.currency,
            input.subtotal_cents,
            input.fees_cents,
            input.total_cents,
            now
        ],
    )?;

    let mut created = Vec::with_capacity(items.len());
    for item in items {
        let item_id = EntityType::OrderItem.gen_id();
        conn.execute(
            "INSERT INTO order_items (id, order_id, kind, tier_id, product_id, hold_id, quantity, unit_price_cents, unit_fee_cents, fees_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &item_id,
                &id,
                item.kind.as_str(),
                &item.tier_id,
                &item.product_id,
                &item.hold_id,
                item.quantity,
                item.unit_price_cents,
                item.unit_fee_cents,
                item.fees_cents,
                now
            ],
        )?;
        created.push(OrderItem {
            id: item_id,
            order_id: id.clone(),
            kind: item.kind,
            tier_id: item.tier_id.clone(),
            product_id: item.product_id.clone(),
            hold_id: item.hold_id.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            unit_fee_cents: item.unit_fee_cents,
            fees_cents: item.fees_cents,
            created_at: now,
        });
    }

    let order = Order {
        id,
        buyer_id: input.buyer_id.clone(),
        buyer_email: input.buyer_email.clone(),
        event_id: input.event_id.clone(),
        currency: input.currency.clone(),
        subtotal_cents: input.subtotal_cents,
        fees_cents: input.fees_cents,
        total_cents: input.total_cents,
        payment_session_id: None,
        payment_intent_id: None,
        session_expires_at: None,
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    Ok((order, created))
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_payment_session_id(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE payment_session_id = ?1", ORDER_COLS),
        &[&session_id],
    )
}

pub fn get_order_by_payment_intent_id(conn: &Connection, intent_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE payment_intent_id = ?1", ORDER_COLS),
        &[&intent_id],
    )
}

pub fn get_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

/// Record the processor session opened for a pending order.
pub fn set_order_payment_session(
    conn: &Connection,
    order_id: &str,
    session_id: &str,
    session_expires_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET payment_session_id = ?2, session_expires_at = ?3, updated_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        params![order_id, session_id, session_expires_at, now()],
    )?;
    Ok(affected > 0)
}

/// Compare-and-set on the order status. Returns false if the order was not in `from`.
pub fn transition_order_status(
    conn: &Connection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(AppError::Internal(format!(
            "Illegal order transition {} -> {}",
            from, to
        )));
    }
    let affected = conn.execute(
        "UPDATE orders SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![order_id, from.as_str(), to.as_str(), now()],
    )?;
    Ok(affected > 0)
}

/// Mark a pending order completed, keeping processor references for refunds.
/// An email already on the order wins over the one from the processor.
pub fn complete_order(
    conn: &Connection,
    order_id: &str,
    payment_intent_id: Option<&str>,
    buyer_email: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'completed',
                payment_intent_id = COALESCE(?2, payment_intent_id),
                buyer_email = COALESCE(buyer_email, ?3),
                updated_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        params![order_id, payment_intent_id, buyer_email, now()],
    )?;
    Ok(affected > 0)
}

// ============ Tickets ============

pub fn create_ticket(
    conn: &Connection,
    order: &Order,
    item: &OrderItem,
    tier_id: &str,
    scan_token: &str,
) -> Result<Ticket> {
    let id = EntityType::Ticket.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO tickets (id, order_id, order_item_id, tier_id, event_id, attendee_name, attendee_email, scan_token, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, 'valid', ?8)",
        params![
            &id,
            &order.id,
            &item.id,
            tier_id,
            &order.event_id,
            &order.buyer_email,
            scan_token,
            now
        ],
    )?;

    Ok(Ticket {
        id,
        order_id: order.id.clone(),
        order_item_id: item.id.clone(),
        tier_id: tier_id.to_string(),
        event_id: order.event_id.clone(),
        attendee_name: None,
        attendee_email: order.buyer_email.clone(),
        scan_token: scan_token.to_string(),
        status: TicketStatus::Valid,
        checked_in_at: None,
        checked_in_by: None,
        created_at: now,
    })
}

pub fn get_ticket_by_id(conn: &Connection, id: &str) -> Result<Option<Ticket>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLS),
        &[&id],
    )
}

pub fn get_ticket_by_scan_token(conn: &Connection, scan_token: &str) -> Result<Option<Ticket>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tickets WHERE scan_token = ?1", TICKET_COLS),
        &[&scan_token],
    )
}

pub fn list_tickets_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Ticket>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM tickets WHERE order_id = ?1 ORDER BY created_at, id",
            TICKET_COLS
        ),
        &[&order_id],
    )
}

/// Admit a ticket. Only one caller can ever win this for a given ticket.
pub fn mark_ticket_used(conn: &Connection, ticket_id: &str, operator_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE tickets SET status = 'used', checked_in_at = ?3, checked_in_by = ?2
         WHERE id = ?1 AND status = 'valid'",
        params![ticket_id, operator_id, now()],
    )?;
    Ok(affected > 0)
}

/// Compare-and-set on the ticket status.
pub fn transition_ticket_status(
    conn: &Connection,
    ticket_id: &str,
    from: TicketStatus,
    to: TicketStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE tickets SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![ticket_id, from.as_str(), to.as_str()],
    )?;
    Ok(affected > 0)
}

/// Refund every still-valid ticket of an order. Used tickets stay used.
pub fn refund_valid_tickets_for_order(conn: &Connection, order_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE tickets SET status = 'refunded' WHERE order_id = ?1 AND status = 'valid'",
        params![order_id],
    )?;
    Ok(affected)
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed.
///
/// Uses INSERT OR IGNORE so the (provider, event_id) primary key decides; run
/// it in the same transaction as the state change it guards.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge webhook dedup records beyond the retention period.
/// Stripe retries for about 3 days, so anything older can't be replayed.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ API Keys ============

/// Create an API key. Returns the stored record and the raw key, which is
/// never persisted and can't be recovered later.
pub fn create_api_key(conn: &Connection, input: &CreateApiKey) -> Result<(ApiKey, String)> {
    let id = EntityType::ApiKey.gen_id();
    let now = now();
    let raw_key = generate_api_key();
    let key_hash = hash_secret(&raw_key);
    let key_prefix: String = raw_key.chars().take(8).collect();

    conn.execute(
        "INSERT INTO api_keys (id, user_id, name, key_prefix, key_hash, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.user_id,
            &input.name,
            &key_prefix,
            &key_hash,
            input.role.as_str(),
            now
        ],
    )?;

    let key = ApiKey {
        id,
        user_id: input.user_id.clone(),
        name: input.name.clone(),
        key_prefix,
        key_hash,
        role: input.role,
        created_at: now,
        revoked_at: None,
    };

    Ok((key, raw_key))
}

/// Look up an active (non-revoked) key by the hash of the presented secret.
pub fn get_api_key_by_hash(conn: &Connection, key_hash: &str) -> Result<Option<ApiKey>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
            API_KEY_COLS
        ),
        &[&key_hash],
    )
}

pub fn revoke_api_key(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_keys SET revoked_at = ?2 WHERE id = ?1 AND revoked_at IS NULL",
        params![id, now()],
    )?;
    Ok(affected > 0)
}

// ============ Scan Log (audit database) ============

pub fn create_scan_log(conn: &Connection, input: &CreateScanLog) -> Result<ScanLog> {
    let id = EntityType::ScanLog.gen_id();
    let timestamp = now();

    conn.execute(
        "INSERT INTO scan_logs (id, timestamp, ticket_id, event_id, operator_id, result, device_id, location, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            timestamp,
            input.ticket_id,
            input.event_id,
            input.operator_id,
            input.result,
            input.device_id,
            input.location,
            input.ip_address,
            input.user_agent
        ],
    )?;

    Ok(ScanLog {
        id,
        timestamp,
        ticket_id: input.ticket_id.map(String::from),
        event_id: input.event_id.to_string(),
        operator_id: input.operator_id.to_string(),
        result: input.result.to_string(),
        device_id: input.device_id.map(String::from),
        location: input.location.map(String::from),
        ip_address: input.ip_address.map(String::from),
        user_agent: input.user_agent.map(String::from),
    })
}

pub fn list_scan_logs_for_ticket(conn: &Connection, ticket_id: &str) -> Result<Vec<ScanLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM scan_logs WHERE ticket_id = ?1 ORDER BY timestamp, rowid",
            SCAN_LOG_COLS
        ),
        &[&ticket_id],
    )
}
