use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::id::is_valid_prefixed_id;
use crate::issuance::scan_payload;
use crate::middleware::AuthContext;
use crate::models::{Order, OrderItem, Ticket};

#[derive(Deserialize)]
pub struct OrderPath {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    /// QR payload; only shown to the buyer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_payload: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub tickets: Vec<TicketView>,
}

/// Order with its items and tickets. Buyers see their own orders, admins see all.
pub async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<OrderPath>,
) -> Result<Json<OrderDetails>> {
    if !is_valid_prefixed_id(&path.order_id) {
        return Err(AppError::NotFound(msg::ORDER_NOT_FOUND.into()));
    }

    let conn = state.db.get()?;
    let order = queries::get_order_by_id(&conn, &path.order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    if !ctx.can_access(&order.buyer_id) {
        return Err(AppError::Forbidden("Not your order".into()));
    }

    let is_buyer = ctx.user_id == order.buyer_id;
    let items = queries::get_order_items(&conn, &order.id)?;
    let tickets = queries::list_tickets_for_order(&conn, &order.id)?
        .into_iter()
        .map(|ticket| TicketView {
            scan_payload: is_buyer.then(|| scan_payload(&state.scan_signer, &ticket)),
            ticket,
        })
        .collect();

    Ok(Json(OrderDetails {
        order,
        items,
        tickets,
    }))
}
