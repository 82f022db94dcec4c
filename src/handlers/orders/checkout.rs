use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::checkout::{self, CartLine, CheckoutRequest, CheckoutResponse};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::AuthContext;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub event_id: String,
    pub items: Vec<CartLine>,
    /// Anonymous device fingerprint, kept on the holds for abuse tracing
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Hold the cart's tickets and open a payment session for them.
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    let response = checkout::checkout(
        &state,
        CheckoutRequest {
            buyer_id: ctx.user_id,
            event_id: body.event_id,
            items: body.items,
            fingerprint: body.fingerprint,
            email: body.email,
        },
    )
    .await?;

    Ok(Json(response))
}
