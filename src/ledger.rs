//! Inventory ledger: the only code that writes a tier's counters.
//!
//! Every mutation is a single conditional `UPDATE` on the tier row, so the row
//! itself is the serialization point and concurrent callers can never drive a
//! counter below zero. Callers run these inside an `IMMEDIATE` transaction so
//! the follow-up invariant read and any hold-row change commit together.

use rusqlite::{Connection, ErrorCode};

use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::models::TierCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerOp {
    /// available -> reserved
    Reserve,
    /// reserved -> available
    Release,
    /// reserved -> sold
    Commit,
}

impl LedgerOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Commit => "commit",
        }
    }
}

/// Move `qty` units from available to reserved.
///
/// Fails with `InsufficientInventory` and changes nothing when fewer than
/// `qty` units are available.
pub fn reserve(conn: &Connection, tier_id: &str, qty: i64) -> Result<TierCounters> {
    apply(conn, tier_id, qty, LedgerOp::Reserve)
}

/// Move `qty` units from reserved back to available.
pub fn release(conn: &Connection, tier_id: &str, qty: i64) -> Result<TierCounters> {
    apply(conn, tier_id, qty, LedgerOp::Release)
}

/// Move `qty` units from reserved to sold.
pub fn commit(conn: &Connection, tier_id: &str, qty: i64) -> Result<TierCounters> {
    apply(conn, tier_id, qty, LedgerOp::Commit)
}

/// Current counters for a tier.
pub fn counters(conn: &Connection, tier_id: &str) -> Result<TierCounters> {
    queries::get_tier_counters(conn, tier_id)?
        .ok_or_else(|| AppError::NotFound(msg::TIER_NOT_FOUND.into()))
}

fn apply(conn: &Connection, tier_id: &str, qty: i64, op: LedgerOp) -> Result<TierCounters> {
    if qty <= 0 {
        return Err(AppError::BadRequest(format!(
            "Ledger {} quantity must be positive, got {}",
            op.as_str(),
            qty
        )));
    }

    let applied = match op {
        LedgerOp::Reserve => queries::reserve_tier_units(conn, tier_id, qty),
        LedgerOp::Release => queries::release_tier_units(conn, tier_id, qty),
        LedgerOp::Commit => queries::commit_tier_units(conn, tier_id, qty),
    }
    .map_err(|e| constraint_to_invariant(e, tier_id, op))?;

    if !applied {
        let current = counters(conn, tier_id)?;
        return Err(match op {
            LedgerOp::Reserve => AppError::InsufficientInventory(format!(
                "{} requested, {} available",
                qty, current.available
            )),
            // A hold says these units are reserved but the tier disagrees
            LedgerOp::Release | LedgerOp::Commit => invariant_violation(
                tier_id,
                op,
                format!(
                    "{} of {} units but only {} reserved",
                    op.as_str(),
                    qty,
                    current.reserved
                ),
            ),
        });
    }

    let after = counters(conn, tier_id)?;
    if !after.is_consistent() {
        return Err(invariant_violation(
            tier_id,
            op,
            format!(
                "available {} + reserved {} + sold {} != capacity {}",
                after.available, after.reserved, after.sold, after.capacity
            ),
        ));
    }

    tracing::debug!(
        tier_id,
        op = op.as_str(),
        qty,
        available = after.available,
        reserved = after.reserved,
        sold = after.sold,
        "Ledger updated"
    );

    Ok(after)
}

fn invariant_violation(tier_id: &str, op: LedgerOp, detail: String) -> AppError {
    tracing::error!(
        target: "alert",
        tier_id,
        op = op.as_str(),
        "Ledger invariant violated: {}",
        detail
    );
    AppError::InvariantViolation(format!("tier {}: {}", tier_id, detail))
}

/// The schema's CHECK constraints are the second line of defence; a hit there
/// is an invariant breach, not an ordinary database error.
fn constraint_to_invariant(err: AppError, tier_id: &str, op: LedgerOp) -> AppError {
    match err {
        AppError::Database(rusqlite::Error::SqliteFailure(e, detail))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            invariant_violation(
                tier_id,
                op,
                detail.unwrap_or_else(|| "constraint violation".to_string()),
            )
        }
        other => other,
    }
}
