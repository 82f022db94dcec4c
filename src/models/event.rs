use serde::{Deserialize, Serialize};

/// An event tickets are sold for. The wider event catalogue lives elsewhere;
/// the core only needs identity, a name for check-in summaries and the start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub starts_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateEvent {
    pub name: String,
    pub starts_at: i64,
}
