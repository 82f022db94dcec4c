use serde::{Deserialize, Serialize};

/// What an API key is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRole {
    /// Buyers: checkout and their own orders
    Customer,
    /// Door staff: check-in only
    Scanner,
    Admin,
}

impl ApiKeyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Scanner => "scanner",
            Self::Admin => "admin",
        }
    }

    pub fn can_scan(&self) -> bool {
        matches!(self, Self::Scanner | Self::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::str::FromStr for ApiKeyRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "scanner" => Ok(Self::Scanner),
            "admin" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub role: ApiKeyRole,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKey {
    pub user_id: String,
    pub name: String,
    pub role: ApiKeyRole,
}
