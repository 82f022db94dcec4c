use serde::{Deserialize, Serialize};

/// A purchasable ticket category with its own price and capacity.
///
/// `available + reserved + sold == capacity` at all times. The counters are only
/// ever written by the inventory ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTier {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub capacity: i64,
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
    pub price_cents: i64,
    pub currency: String,
    /// Per-tier fee override (flat part). Either override column being set
    /// replaces the event/site fee configuration for this tier.
    pub fee_flat_cents: Option<i64>,
    pub fee_percentage_bps: Option<i64>,
    pub display_order: i64,
    /// Keep this tier off sale until the tier before it sells out
    pub hide_until_previous_sold_out: bool,
    pub created_at: i64,
}

impl TicketTier {
    pub fn counters(&self) -> TierCounters {
        TierCounters {
            capacity: self.capacity,
            available: self.available,
            reserved: self.reserved,
            sold: self.sold,
        }
    }

    pub fn has_fee_override(&self) -> bool {
        self.fee_flat_cents.is_some() || self.fee_percentage_bps.is_some()
    }
}

/// Snapshot of a tier's ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierCounters {
    pub capacity: i64,
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
}

impl TierCounters {
    /// True when no counter is negative and they add up to capacity.
    pub fn is_consistent(&self) -> bool {
        self.available >= 0
            && self.reserved >= 0
            && self.sold >= 0
            && self.available + self.reserved + self.sold == self.capacity
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketTier {
    pub name: String,
    pub capacity: i64,
    pub price_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub fee_flat_cents: Option<i64>,
    #[serde(default)]
    pub fee_percentage_bps: Option<i64>,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub hide_until_previous_sold_out: bool,
}
