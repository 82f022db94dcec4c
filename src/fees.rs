//! Fee calculation for checkout line items.
//!
//! Pure functions, no I/O. A line's fee is the sum of every applicable rule:
//! each flat fee is charged once per line item, each percentage fee applies
//! once to the line subtotal and is rounded half-up to the cent.

use serde::Serialize;

use crate::error::{AppError, Result, msg};
use crate::models::{FeeRule, TicketTier};

const BPS_DENOMINATOR: i128 = 10_000;

/// One fee component, detached from where it was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEntry {
    pub flat_cents: i64,
    pub percentage_bps: i64,
}

impl From<&FeeRule> for FeeEntry {
    fn from(rule: &FeeRule) -> Self {
        Self {
            flat_cents: rule.flat_cents,
            percentage_bps: rule.percentage_bps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineFees {
    pub subtotal_cents: i64,
    /// Fee for the whole line. This is what gets charged.
    pub fees_cents: i64,
    /// Fee a single unit would carry on its own, for display next to the unit
    /// price. Not a share of `fees_cents`.
    pub unit_fee_cents: i64,
}

/// Compute subtotal and fees for `quantity` units at `unit_price_cents`.
///
/// Same inputs always give the same result. Negative amounts or results that
/// don't fit in an `i64` are rejected.
pub fn calculate_line_fees(
    unit_price_cents: i64,
    quantity: i64,
    entries: &[FeeEntry],
) -> Result<LineFees> {
    if unit_price_cents < 0 {
        return Err(AppError::BadRequest("Price cannot be negative".into()));
    }
    if quantity <= 0 {
        return Err(AppError::BadRequest(msg::INVALID_QUANTITY.into()));
    }
    if entries
        .iter()
        .any(|e| e.flat_cents < 0 || e.percentage_bps < 0)
    {
        return Err(AppError::BadRequest("Fees cannot be negative".into()));
    }

    let subtotal = unit_price_cents as i128 * quantity as i128;
    let fees = fees_for(subtotal, entries)?;
    let unit_fee = fees_for(unit_price_cents as i128, entries)?;

    Ok(LineFees {
        subtotal_cents: to_cents(subtotal)?,
        fees_cents: to_cents(fees)?,
        unit_fee_cents: to_cents(unit_fee)?,
    })
}

fn fees_for(subtotal: i128, entries: &[FeeEntry]) -> Result<i128> {
    entries.iter().try_fold(0i128, |total, e| {
        percentage_of(subtotal, e.percentage_bps)
            .and_then(|pct| total.checked_add(e.flat_cents as i128)?.checked_add(pct))
            .ok_or_else(|| AppError::BadRequest(msg::AMOUNT_OVERFLOW.into()))
    })
}

/// `amount * bps / 10000`, rounded half-up. Both inputs are non-negative.
fn percentage_of(amount: i128, bps: i64) -> Option<i128> {
    let scaled = amount.checked_mul(bps as i128)?.checked_add(BPS_DENOMINATOR / 2)?;
    Some(scaled / BPS_DENOMINATOR)
}

fn to_cents(value: i128) -> Result<i64> {
    i64::try_from(value).map_err(|_| AppError::BadRequest(msg::AMOUNT_OVERFLOW.into()))
}

/// Pick the fee configuration that applies to a tier.
///
/// A tier override (either column set) wins, then the event's rules, then the
/// site-wide defaults. No configuration at all means no fees.
pub fn resolve_fee_entries(
    tier: &TicketTier,
    event_rules: &[FeeRule],
    site_rules: &[FeeRule],
) -> Vec<FeeEntry> {
    if tier.has_fee_override() {
        return vec![FeeEntry {
            flat_cents: tier.fee_flat_cents.unwrap_or(0),
            percentage_bps: tier.fee_percentage_bps.unwrap_or(0),
        }];
    }

    let rules = if event_rules.is_empty() {
        site_rules
    } else {
        event_rules
    };
    rules.iter().map(FeeEntry::from).collect()
}
