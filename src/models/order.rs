use serde::{Deserialize, Serialize};

/// Order lifecycle.
///
/// `pending -> completed | failed | expired`, then `completed -> refunded`.
/// Every other transition is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Expired)
                | (Self::Completed, Self::Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Completed)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "expired" => Ok(Self::Expired),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One checkout attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub buyer_email: Option<String>,
    pub event_id: String,

    // Amounts (cents)
    pub currency: String,
    pub subtotal_cents: i64,
    pub fees_cents: i64,
    pub total_cents: i64,

    // Payment processor references
    pub payment_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub session_expires_at: Option<i64>,

    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderItemKind {
    Ticket,
    Product,
}

impl OrderItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Product => "product",
        }
    }
}

impl std::str::FromStr for OrderItemKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticket" => Ok(Self::Ticket),
            "product" => Ok(Self::Product),
            _ => Err(()),
        }
    }
}

/// Line item, priced as of order creation so later price changes never
/// alter a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub kind: OrderItemKind,
    pub tier_id: Option<String>,
    pub product_id: Option<String>,
    /// The hold backing this line. Kept after the hold row is gone as a reference.
    pub hold_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Fee for a single unit at order time (display only)
    pub unit_fee_cents: i64,
    /// Authoritative fee for the whole line
    pub fees_cents: i64,
    pub created_at: i64,
}

/// Data required to create a pending order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub buyer_id: String,
    pub buyer_email: Option<String>,
    pub event_id: String,
    pub currency: String,
    pub subtotal_cents: i64,
    pub fees_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone)]
pub struct CreateOrderItem {
    pub kind: OrderItemKind,
    pub tier_id: Option<String>,
    pub product_id: Option<String>,
    pub hold_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_fee_cents: i64,
    pub fees_cents: i64,
}
