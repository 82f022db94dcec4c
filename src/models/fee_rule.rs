use serde::{Deserialize, Serialize};

/// One configured fee component. `event_id = None` marks a site-wide default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRule {
    pub id: String,
    pub event_id: Option<String>,
    pub flat_cents: i64,
    /// Basis points of the line subtotal (300 = 3%)
    pub percentage_bps: i64,
    pub position: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateFeeRule {
    #[serde(default)]
    pub event_id: Option<String>,
    pub flat_cents: i64,
    pub percentage_bps: i64,
    #[serde(default)]
    pub position: i64,
}
