use serde::{Deserialize, Serialize};

/// `valid -> used` at the door; `valid -> refunded | cancelled` via order management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Valid,
    Used,
    Refunded,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Used => "used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "used" => Ok(Self::Used),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One admission. Never deleted; refunds and cancellations are statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub order_id: String,
    pub order_item_id: String,
    pub tier_id: String,
    pub event_id: String,
    pub attendee_name: Option<String>,
    pub attendee_email: Option<String>,
    #[serde(skip_serializing)]
    pub scan_token: String,
    pub status: TicketStatus,
    pub checked_in_at: Option<i64>,
    pub checked_in_by: Option<String>,
    pub created_at: i64,
}
