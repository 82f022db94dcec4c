//! Check-in validation at the door.
//!
//! Rejections are ordinary results (a reason code), not errors: the scanner UI
//! always gets a 200 with `valid: false` and a reason. Only infrastructure
//! failures surface as `AppError`.

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::crypto::ScanTokenSigner;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::models::{ApiKeyRole, CreateScanLog, Ticket, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidQr,
    AlreadyUsed,
    Refunded,
    Cancelled,
    NotFound,
    PermissionDenied,
    EventMismatch,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQr => "invalid_qr",
            Self::AlreadyUsed => "already_used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::EventMismatch => "event_mismatch",
        }
    }
}

/// What the door staff sees about a scanned ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub ticket_id: String,
    pub event_id: String,
    pub event_name: Option<String>,
    pub tier_id: String,
    pub tier_name: Option<String>,
    pub attendee_name: Option<String>,
    pub attendee_email: Option<String>,
    pub checked_in_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketSummary>,
}

impl CheckinResult {
    fn admitted(ticket: TicketSummary) -> Self {
        Self {
            valid: true,
            reason: None,
            ticket: Some(ticket),
        }
    }

    fn rejected(reason: RejectReason, ticket: Option<TicketSummary>) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            ticket,
        }
    }
}

/// Who is scanning, and from where. Everything but the operator is optional.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub operator_id: String,
    pub role: ApiKeyRole,
    pub device_id: Option<String>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

fn summarize(conn: &Connection, ticket: &Ticket) -> Result<TicketSummary> {
    let event = queries::get_event_by_id(conn, &ticket.event_id)?;
    let tier = queries::get_ticket_tier_by_id(conn, &ticket.tier_id)?;
    Ok(TicketSummary {
        ticket_id: ticket.id.clone(),
        event_id: ticket.event_id.clone(),
        event_name: event.map(|e| e.name),
        tier_id: ticket.tier_id.clone(),
        tier_name: tier.map(|t| t.name),
        attendee_name: ticket.attendee_name.clone(),
        attendee_email: ticket.attendee_email.clone(),
        checked_in_at: ticket.checked_in_at,
    })
}

fn reason_for(status: TicketStatus) -> Option<RejectReason> {
    match status {
        TicketStatus::Valid => None,
        TicketStatus::Used => Some(RejectReason::AlreadyUsed),
        TicketStatus::Refunded => Some(RejectReason::Refunded),
        TicketStatus::Cancelled => Some(RejectReason::Cancelled),
    }
}

/// Validate a scanned payload and admit the ticket if it is valid.
///
/// Returns the result and, when the payload resolved to a ticket, its id (for
/// the scan log). Of any number of concurrent scans of one ticket, exactly one
/// is admitted; the rest see `already_used`.
pub fn validate_scan(
    conn: &Connection,
    signer: &ScanTokenSigner,
    payload: &str,
    event_id: &str,
    ctx: &ScanContext,
) -> Result<(CheckinResult, Option<String>)> {
    if !ctx.role.can_scan() {
        return Ok((CheckinResult::rejected(RejectReason::PermissionDenied, None), None));
    }

    let Some(token) = signer.verify(payload) else {
        return Ok((CheckinResult::rejected(RejectReason::InvalidQr, None), None));
    };

    let Some(ticket) = queries::get_ticket_by_scan_token(conn, token)? else {
        return Ok((CheckinResult::rejected(RejectReason::NotFound, None), None));
    };

    if ticket.event_id != event_id {
        return Ok((
            CheckinResult::rejected(RejectReason::EventMismatch, None),
            Some(ticket.id),
        ));
    }

    if queries::mark_ticket_used(conn, &ticket.id, &ctx.operator_id)? {
        let admitted = queries::get_ticket_by_id(conn, &ticket.id)?.unwrap_or(ticket);
        tracing::info!(
            ticket_id = %admitted.id,
            event_id,
            operator_id = %ctx.operator_id,
            "Ticket checked in"
        );
        let summary = summarize(conn, &admitted)?;
        return Ok((CheckinResult::admitted(summary), Some(admitted.id)));
    }

    // Lost the race or was never valid; report what it is now
    let current = queries::get_ticket_by_id(conn, &ticket.id)?
        .ok_or_else(|| AppError::NotFound(msg::TICKET_NOT_FOUND.into()))?;
    let reason = reason_for(current.status).ok_or_else(|| {
        AppError::Internal(format!(
            "Ticket {} is valid but could not be checked in",
            current.id
        ))
    })?;
    let summary = summarize(conn, &current)?;
    Ok((CheckinResult::rejected(reason, Some(summary)), Some(current.id)))
}

/// Run a scan and append it to the scan log.
pub fn check_in(
    state: &AppState,
    payload: &str,
    event_id: &str,
    ctx: &ScanContext,
) -> Result<CheckinResult> {
    let (result, ticket_id) = {
        let conn = state.db.get()?;
        validate_scan(&conn, &state.scan_signer, payload, event_id, ctx)?
    };

    let outcome = match result.reason {
        Some(reason) => reason.as_str(),
        None => "ok",
    };
    if let Err(e) = record_scan(state, ticket_id.as_deref(), event_id, outcome, ctx) {
        tracing::warn!("Failed to write scan log: {}", e);
    }

    Ok(result)
}

fn record_scan(
    state: &AppState,
    ticket_id: Option<&str>,
    event_id: &str,
    result: &str,
    ctx: &ScanContext,
) -> Result<()> {
    let audit_conn = state.audit.get()?;
    queries::create_scan_log(
        &audit_conn,
        &CreateScanLog {
            ticket_id,
            event_id,
            operator_id: &ctx.operator_id,
            result,
            device_id: ctx.device_id.as_deref(),
            location: ctx.location.as_deref(),
            ip_address: ctx.ip_address.as_deref(),
            user_agent: ctx.user_agent.as_deref(),
        },
    )?;
    Ok(())
}

/// Void a ticket that hasn't been used (order management).
///
/// Only `valid` tickets can be cancelled; anything else is `InvalidTicketState`.
pub fn cancel_ticket(conn: &mut Connection, ticket_id: &str) -> Result<Ticket> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let ticket = queries::get_ticket_by_id(&tx, ticket_id)?
        .ok_or_else(|| AppError::NotFound(msg::TICKET_NOT_FOUND.into()))?;

    if !queries::transition_ticket_status(&tx, ticket_id, TicketStatus::Valid, TicketStatus::Cancelled)? {
        return Err(AppError::InvalidTicketState(format!(
            "Ticket is {}, only valid tickets can be cancelled",
            ticket.status
        )));
    }

    tx.commit()?;
    tracing::info!(ticket_id, "Ticket cancelled");

    Ok(Ticket {
        status: TicketStatus::Cancelled,
        ..ticket
    })
}
