use serde::{Deserialize, Serialize};

/// Audit trail entry for one check-in attempt (stored in the audit database).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLog {
    pub id: String,
    pub timestamp: i64,
    pub ticket_id: Option<String>,
    pub event_id: String,
    pub operator_id: String,
    /// `ok` or the rejection reason code
    pub result: String,
    pub device_id: Option<String>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Default)]
pub struct CreateScanLog<'a> {
    pub ticket_id: Option<&'a str>,
    pub event_id: &'a str,
    pub operator_id: &'a str,
    pub result: &'a str,
    pub device_id: Option<&'a str>,
    pub location: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}
