//! Ticket issuance: one ticket per purchased unit, each with its own
//! unguessable scan token.

use rusqlite::Connection;

use crate::crypto::{ScanTokenSigner, generate_scan_token};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Order, OrderItemKind, Ticket};

/// Create the tickets for a completed order.
///
/// Idempotent per order: if the order already has tickets they are returned
/// unchanged. Runs inside the reconciliation transaction so tickets exist if
/// and only if the order completed.
pub fn issue_tickets(conn: &Connection, order: &Order) -> Result<Vec<Ticket>> {
    let existing = queries::list_tickets_for_order(conn, &order.id)?;
    if !existing.is_empty() {
        tracing::debug!(order_id = %order.id, "Tickets already issued");
        return Ok(existing);
    }

    let mut tickets = Vec::new();
    for item in queries::get_order_items(conn, &order.id)? {
        if item.kind != OrderItemKind::Ticket {
            continue;
        }
        let tier_id = item.tier_id.clone().ok_or_else(|| {
            AppError::Internal(format!("Ticket item {} has no tier", item.id))
        })?;

        for _ in 0..item.quantity {
            tickets.push(queries::create_ticket(
                conn,
                order,
                &item,
                &tier_id,
                &generate_scan_token(),
            )?);
        }
    }

    tracing::info!(order_id = %order.id, count = tickets.len(), "Tickets issued");
    Ok(tickets)
}

/// The string encoded into a ticket's QR code.
pub fn scan_payload(signer: &ScanTokenSigner, ticket: &Ticket) -> String {
    signer.sign(&ticket.scan_token)
}
