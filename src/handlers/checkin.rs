use axum::{
    Router,
    extract::{Extension, State},
    http::HeaderMap,
    middleware,
    routing::post,
};
use serde::Deserialize;

use crate::checkin::{self, CheckinResult, ScanContext};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::{AuthContext, api_key_auth};
use crate::util::RequestInfo;

#[derive(Debug, Deserialize)]
pub struct CheckinBody {
    /// Scanned QR payload
    pub token: String,
    pub event_id: String,
    /// Operator identity to stamp on the scan instead of the key's user, for
    /// staff sharing one scanner key. Honored only for keys that may scan.
    #[serde(default)]
    pub scanner_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Validate a scanned ticket.
///
/// Always 200 for a well-formed request; rejections come back as
/// `{"valid": false, "reason": ...}`.
pub async fn checkin(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<CheckinBody>,
) -> Result<Json<CheckinResult>> {
    let info = RequestInfo::from_headers(&headers);
    let operator_id = match body.scanner_id {
        Some(scanner_id) if ctx.role.can_scan() && !scanner_id.trim().is_empty() => scanner_id,
        _ => ctx.user_id,
    };
    let scan = ScanContext {
        operator_id,
        role: ctx.role,
        device_id: body.device_id,
        location: body.location,
        ip_address: info.ip_address,
        user_agent: info.user_agent,
    };

    let result = checkin::check_in(&state, &body.token, &body.event_id, &scan)?;
    Ok(Json(result))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/checkin", post(checkin))
        .layer(middleware::from_fn_with_state(state, api_key_auth))
}
