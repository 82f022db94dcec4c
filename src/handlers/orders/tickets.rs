use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::checkin;
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::middleware::AuthContext;
use crate::models::Ticket;

#[derive(Deserialize)]
pub struct TicketPath {
    pub ticket_id: String,
}

/// Void an unused ticket.
pub async fn cancel_ticket(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<TicketPath>,
) -> Result<Json<Ticket>> {
    let mut conn = state.db.get()?;
    let ticket = checkin::cancel_ticket(&mut conn, &path.ticket_id)?;

    tracing::info!(
        ticket_id = %ticket.id,
        admin = %ctx.user_id,
        "Ticket cancelled by admin"
    );
    Ok(Json(ticket))
}
