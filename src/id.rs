//! Prefixed ID generation for boxoffice entities.
//!
//! All IDs use a `bx_` brand prefix so they can never be confused with payment
//! provider IDs (Stripe's `cs_`, `pi_`, `evt_`, etc.).
//!
//! Format: `bx_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "bx_evt_",
    "bx_tier_",
    "bx_prod_",
    "bx_fee_",
    "bx_hold_",
    "bx_ord_",
    "bx_item_",
    "bx_tkt_",
    "bx_key_",
    "bx_scan_",
];

/// Validate that a string is a valid prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `bx_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Event,
    TicketTier,
    Product,
    FeeRule,
    Hold,
    Order,
    OrderItem,
    Ticket,
    ApiKey,
    ScanLog,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Event => "bx_evt",
            Self::TicketTier => "bx_tier",
            Self::Product => "bx_prod",
            Self::FeeRule => "bx_fee",
            Self::Hold => "bx_hold",
            Self::Order => "bx_ord",
            Self::OrderItem => "bx_item",
            Self::Ticket => "bx_tkt",
            Self::ApiKey => "bx_key",
            Self::ScanLog => "bx_scan",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
