use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error strings shared by handlers and the core modules.
pub mod msg {
    pub const EVENT_NOT_FOUND: &str = "Event not found";
    pub const TIER_NOT_FOUND: &str = "Ticket tier not found";
    pub const PRODUCT_NOT_FOUND: &str = "Product not found";
    pub const ORDER_NOT_FOUND: &str = "Order not found";
    pub const HOLD_NOT_FOUND: &str = "Hold no longer exists";
    pub const TICKET_NOT_FOUND: &str = "Ticket not found";
    pub const EMPTY_CART: &str = "Cart must contain at least one item";
    pub const INVALID_QUANTITY: &str = "Quantity must be between 1 and the per-line limit";
    pub const AMBIGUOUS_LINE_ITEM: &str = "Each line item needs exactly one of tier_id or product_id";
    pub const TIER_NOT_IN_EVENT: &str = "Ticket tier does not belong to this event";
    pub const TIER_NOT_VISIBLE: &str = "Ticket tier is not on sale yet";
    pub const PRODUCT_NOT_IN_EVENT: &str = "Product does not belong to this event";
    pub const MIXED_CURRENCY: &str = "All items in a cart must share one currency";
    pub const AMOUNT_OVERFLOW: &str = "Amount out of range";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Not enough `available` units on a tier. Recoverable, not retryable as-is.
    #[error("Insufficient inventory: {0}")]
    InsufficientInventory(String),

    /// The hold backing a purchase is gone. The buyer has to restart checkout.
    #[error("Hold expired: {0}")]
    HoldExpired(String),

    #[error("Invalid ticket state: {0}")]
    InvalidTicketState(String),

    /// Payment processor unreachable or refused the request. Retryable after backoff.
    #[error("Payment subsystem unavailable: {0}")]
    PaymentSubsystemUnavailable(String),

    /// Ledger counters no longer add up. Fatal; never corrected in place.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request body: {0}")]
    JsonRejection(#[from] JsonRejection),

    #[error("Invalid path: {0}")]
    PathRejection(#[from] PathRejection),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::InsufficientInventory(msg) => (
                StatusCode::BAD_REQUEST,
                "Insufficient inventory",
                Some(msg.clone()),
            ),
            AppError::HoldExpired(msg) => (StatusCode::CONFLICT, "Hold expired", Some(msg.clone())),
            AppError::InvalidTicketState(msg) => (
                StatusCode::CONFLICT,
                "Invalid ticket state",
                Some(msg.clone()),
            ),
            AppError::PaymentSubsystemUnavailable(msg) => {
                tracing::error!("Payment subsystem unavailable: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Payment subsystem unavailable",
                    None,
                )
            }
            AppError::InvariantViolation(msg) => {
                tracing::error!("Invariant violation: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::JsonRejection(e) => (e.status(), "Invalid request body", Some(e.body_text())),
            AppError::PathRejection(e) => (e.status(), "Invalid path", Some(e.body_text())),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Turns `Option<T>` lookups into `AppError::NotFound` with a fixed message.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}
