mod stripe;

pub use stripe::*;

use futures::future::BoxFuture;

use crate::error::{AppError, Result};

/// A line shown on the processor's hosted checkout page.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: i64,
}

/// Everything the processor needs to open a hosted checkout for one order.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: String,
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix timestamp after which the processor must refuse payment
    pub expires_at: i64,
}

impl CheckoutSessionRequest {
    pub fn total_cents(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.unit_amount_cents * item.quantity)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionCreated {
    pub session_id: String,
    pub checkout_url: String,
}

/// Outbound side of a payment processor.
///
/// Inbound notifications go through `handlers::webhooks`; this trait only opens
/// sessions, so checkout can run against a fake processor in tests.
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn create_checkout_session<'a>(
        &'a self,
        request: &'a CheckoutSessionRequest,
    ) -> BoxFuture<'a, Result<CheckoutSessionCreated>>;
}

/// Gateway used when no processor credentials are configured.
pub struct DisabledGateway;

impl PaymentGateway for DisabledGateway {
    fn provider_name(&self) -> &'static str {
        "disabled"
    }

    fn create_checkout_session<'a>(
        &'a self,
        _request: &'a CheckoutSessionRequest,
    ) -> BoxFuture<'a, Result<CheckoutSessionCreated>> {
        Box::pin(async {
            Err(AppError::PaymentSubsystemUnavailable(
                "No payment processor configured".into(),
            ))
        })
    }
}
