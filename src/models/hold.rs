use serde::{Deserialize, Serialize};

/// A temporary claim on `quantity` units of a tier.
///
/// The row existing *is* the active state. Promotion, expiry and cancellation
/// all delete the row; there is no status column to update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub id: String,
    pub tier_id: String,
    pub quantity: i64,
    /// Authenticated user id or anonymous device fingerprint
    pub owner_id: String,
    pub fingerprint: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
}

impl Hold {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
