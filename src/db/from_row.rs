//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to define how they are built from a row selected
//! with the matching `*_COLS` constant, which lets `query_one` and `query_all`
//! replace hand-written mapping closures.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
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

pub const EVENT_COLS: &str = "id, name, starts_at, created_at";

pub const TICKET_TIER_COLS: &str = "id, event_id, name, capacity, available, reserved, sold, price_cents, currency, fee_flat_cents, fee_percentage_bps, display_order, hide_until_previous_sold_out, created_at";

pub const TIER_COUNTER_COLS: &str = "capacity, available, reserved, sold";

pub const PRODUCT_COLS: &str = "id, event_id, name, price_cents, currency, active, created_at";

pub const FEE_RULE_COLS: &str = "id, event_id, flat_cents, percentage_bps, position, created_at";

pub const HOLD_COLS: &str = "id, tier_id, quantity, owner_id, fingerprint, expires_at, created_at";

pub const ORDER_COLS: &str = "id, buyer_id, buyer_email, event_id, currency, subtotal_cents, fees_cents, total_cents, payment_session_id, payment_intent_id, session_expires_at, status, created_at, updated_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, kind, tier_id, product_id, hold_id, quantity, unit_price_cents, unit_fee_cents, fees_cents, created_at";

pub const TICKET_COLS: &str = "id, order_id, order_item_id, tier_id, event_id, attendee_name, attendee_email, scan_token, status, checked_in_at, checked_in_by, created_at";

pub const API_KEY_COLS: &str =
    "id, user_id, name, key_prefix, key_hash, role, created_at, revoked_at";

pub const SCAN_LOG_COLS: &str = "id, timestamp, ticket_id, event_id, operator_id, result, device_id, location, ip_address, user_agent";

// ============ FromRow Implementations ============

impl FromRow for Event {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            name: row.get(1)?,
            starts_at: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for TicketTier {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TicketTier {
            id: row.get(0)?,
            event_id: row.get(1)?,
            name: row.get(2)?,
            capacity: row.get(3)?,
            available: row.get(4)?,
            reserved: row.get(5)?,
            sold: row.get(6)?,
            price_cents: row.get(7)?,
            currency: row.get(8)?,
            fee_flat_cents: row.get(9)?,
            fee_percentage_bps: row.get(10)?,
            display_order: row.get(11)?,
            hide_until_previous_sold_out: row.get::<_, i32>(12)? != 0,
            created_at: row.get(13)?,
        })
    }
}

impl FromRow for TierCounters {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TierCounters {
            capacity: row.get(0)?,
            available: row.get(1)?,
            reserved: row.get(2)?,
            sold: row.get(3)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            event_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            active: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for FeeRule {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FeeRule {
            id: row.get(0)?,
            event_id: row.get(1)?,
            flat_cents: row.get(2)?,
            percentage_bps: row.get(3)?,
            position: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Hold {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Hold {
            id: row.get(0)?,
            tier_id: row.get(1)?,
            quantity: row.get(2)?,
            owner_id: row.get(3)?,
            fingerprint: row.get(4)?,
            expires_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            buyer_id: row.get(1)?,
            buyer_email: row.get(2)?,
            event_id: row.get(3)?,
            currency: row.get(4)?,
            subtotal_cents: row.get(5)?,
            fees_cents: row.get(6)?,
            total_cents: row.get(7)?,
            payment_session_id: row.get(8)?,
            payment_intent_id: row.get(9)?,
            session_expires_at: row.get(10)?,
            status: parse_enum(row, 11, "status")?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            tier_id: row.get(3)?,
            product_id: row.get(4)?,
            hold_id: row.get(5)?,
            quantity: row.get(6)?,
            unit_price_cents: row.get(7)?,
            unit_fee_cents: row.get(8)?,
            fees_cents: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for Ticket {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Ticket {
            id: row.get(0)?,
            order_id: row.get(1)?,
            order_item_id: row.get(2)?,
            tier_id: row.get(3)?,
            event_id: row.get(4)?,
            attendee_name: row.get(5)?,
            attendee_email: row.get(6)?,
            scan_token: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            checked_in_at: row.get(9)?,
            checked_in_by: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl FromRow for ApiKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ApiKey {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            key_prefix: row.get(3)?,
            key_hash: row.get(4)?,
            role: parse_enum(row, 5, "role")?,
            created_at: row.get(6)?,
            revoked_at: row.get(7)?,
        })
    }
}

impl FromRow for ScanLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ScanLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            ticket_id: row.get(2)?,
            event_id: row.get(3)?,
            operator_id: row.get(4)?,
            result: row.get(5)?,
            device_id: row.get(6)?,
            location: row.get(7)?,
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
        })
    }
}
