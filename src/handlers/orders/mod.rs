mod checkout;
mod orders;
mod tickets;

pub use checkout::*;
pub use orders::*;
pub use tickets::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::{api_key_auth, require_admin_role};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/orders/{order_id}", get(get_order))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_auth))
        .merge(
            Router::new()
                // Order management (admin only)
                .route("/tickets/{ticket_id}/cancel", post(cancel_ticket))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    require_admin_role,
                )),
        )
}
