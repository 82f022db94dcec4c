//! Hold manager: time-boxed reservations against a tier.
//!
//! A hold row existing means the reservation is active. Every terminal
//! transition (promotion to a sale, expiry, cancellation) starts by claiming
//! the row with `DELETE ... RETURNING`, so exactly one of the sweeper,
//! reconciliation and an abandoning buyer gets to apply it to the ledger.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::ledger;
use crate::models::{Hold, OrderItemKind};

/// Holds released per sweep query. The sweep loops until nothing is left.
const SWEEP_BATCH_SIZE: i64 = 500;

/// Reserve `quantity` units of a tier for `ttl_secs`.
///
/// Ledger reserve and hold insert commit together. `InsufficientInventory`
/// propagates and leaves nothing behind.
pub fn create_hold(
    conn: &mut Connection,
    tier_id: &str,
    quantity: i64,
    owner_id: &str,
    fingerprint: Option<&str>,
    ttl_secs: i64,
) -> Result<Hold> {
    let now = Utc::now().timestamp();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    ledger::reserve(&tx, tier_id, quantity)?;
    let hold = queries::insert_hold(
        &tx,
        tier_id,
        quantity,
        owner_id,
        fingerprint,
        now + ttl_secs,
        now,
    )?;

    tx.commit()?;

    tracing::info!(
        hold_id = %hold.id,
        tier_id,
        quantity,
        expires_at = hold.expires_at,
        "Hold created"
    );
    Ok(hold)
}

/// Give a hold's units back to the tier.
///
/// Idempotent: returns `false` without touching the ledger when the hold was
/// already promoted, expired or released.
pub fn release_hold(conn: &mut Connection, hold_id: &str) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let released = release_hold_within(&tx, hold_id)?;
    tx.commit()?;
    Ok(released)
}

/// Same as [`release_hold`] but runs in the caller's transaction.
pub fn release_hold_within(conn: &Connection, hold_id: &str) -> Result<bool> {
    let Some(hold) = queries::claim_hold(conn, hold_id)? else {
        return Ok(false);
    };

    ledger::release(conn, &hold.tier_id, hold.quantity)?;
    tracing::info!(
        hold_id,
        tier_id = %hold.tier_id,
        quantity = hold.quantity,
        "Hold released"
    );
    Ok(true)
}

/// Turn a hold into a sale.
///
/// Must run inside the caller's transaction. A hold that is gone, or still
/// present but past `expires_at` (not swept yet), fails with `HoldExpired`;
/// in the second case its units are released as part of the claim.
pub fn promote_hold(conn: &Connection, hold_id: &str, now: i64) -> Result<Hold> {
    let hold = queries::claim_hold(conn, hold_id)?
        .ok_or_else(|| AppError::HoldExpired(msg::HOLD_NOT_FOUND.into()))?;

    if hold.is_expired(now) {
        ledger::release(conn, &hold.tier_id, hold.quantity)?;
        tracing::info!(
            hold_id,
            tier_id = %hold.tier_id,
            expired_at = hold.expires_at,
            "Hold expired at promotion, units released"
        );
        return Err(AppError::HoldExpired(format!(
            "Hold {} expired at {}",
            hold_id, hold.expires_at
        )));
    }

    ledger::commit(conn, &hold.tier_id, hold.quantity)?;
    tracing::info!(
        hold_id,
        tier_id = %hold.tier_id,
        quantity = hold.quantity,
        "Hold promoted"
    );
    Ok(hold)
}

/// Release every hold whose TTL has run out as of `now`.
///
/// Each hold is released in its own transaction so one bad row can't stall
/// the sweep. Holds claimed by someone else in the meantime are skipped.
/// Returns the number of holds this call released.
pub fn sweep_expired_holds(conn: &mut Connection, now: i64) -> Result<usize> {
    let mut released = 0;

    loop {
        let ids = queries::list_expired_hold_ids(conn, now, SWEEP_BATCH_SIZE)?;
        if ids.is_empty() {
            break;
        }

        let mut progressed = false;
        for id in &ids {
            match release_hold(conn, id) {
                Ok(true) => {
                    released += 1;
                    progressed = true;
                }
                Ok(false) => {
                    progressed = true;
                }
                Err(e) => {
                    tracing::warn!(hold_id = %id, "Failed to release expired hold: {}", e);
                }
            }
        }

        // Every row in the batch failed; retry on the next tick instead of spinning
        if !progressed || (ids.len() as i64) < SWEEP_BATCH_SIZE {
            break;
        }
    }

    if released > 0 {
        tracing::info!("Released {} expired holds", released);
    }
    Ok(released)
}

/// Release the still-active holds referenced by an order's ticket items.
/// Runs in the caller's transaction. Returns how many were released.
pub fn release_holds_for_order(conn: &Connection, order_id: &str) -> Result<usize> {
    let mut released = 0;
    for item in queries::get_order_items(conn, order_id)? {
        if item.kind != OrderItemKind::Ticket {
            continue;
        }
        if let Some(hold_id) = &item.hold_id {
            if release_hold_within(conn, hold_id)? {
                released += 1;
            }
        }
    }
    Ok(released)
}
