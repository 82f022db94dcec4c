use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::crypto::hash_secret;
use crate::db::{AppState, queries};
use crate::models::{ApiKey, ApiKeyRole};
use crate::util::extract_bearer_token;

/// The authenticated caller, inserted into request extensions by [`api_key_auth`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub role: ApiKeyRole,
    /// The API key ID (not the key itself)
    pub key_id: String,
    /// The visible key prefix (e.g., "bx_a1b2c")
    pub key_prefix: String,
}

impl AuthContext {
    /// Whether this caller may see or act on a resource owned by `owner_id`.
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.role.is_admin() || self.user_id == owner_id
    }
}

impl From<ApiKey> for AuthContext {
    fn from(key: ApiKey) -> Self {
        Self {
            user_id: key.user_id,
            role: key.role,
            key_id: key.id,
            key_prefix: key.key_prefix,
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error during auth: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let key = queries::get_api_key_by_hash(&conn, &hash_secret(token))
        .map_err(|e| {
            tracing::error!("API key lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let ctx = AuthContext::from(key);
    tracing::debug!(
        key_id = %ctx.key_id,
        key_prefix = %ctx.key_prefix,
        role = ctx.role.as_str(),
        "API key authenticated"
    );
    Ok(ctx)
}

/// Require a valid, unrevoked API key of any role.
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let ctx = authenticate(&state, request.headers())?;

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Require an admin API key.
pub async fn require_admin_role(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let ctx = authenticate(&state, request.headers())?;

    if !ctx.role.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
