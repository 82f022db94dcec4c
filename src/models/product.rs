use serde::{Deserialize, Serialize};

/// Non-ticket line item (merchandise, parking, add-ons).
/// Priced and recorded on orders, but carries no inventory in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
}
