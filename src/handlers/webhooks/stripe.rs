use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::AppState;
use crate::error::AppError;
use crate::payments::{
    StripeCharge, StripeCheckoutSession, StripePaymentIntent, StripeWebhookEvent,
    verify_webhook_signature,
};

use super::common::{
    PaymentEvent, PaymentEventData, WebhookProvider, WebhookResult, handle_webhook,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider;

impl WebhookProvider for StripeWebhookProvider {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult> {
        // 5xx so Stripe keeps retrying until the secret is configured
        let Some(secret) = state.stripe_webhook_secret.as_deref() else {
            tracing::error!("Stripe webhook received but STRIPE_WEBHOOK_SECRET is not set");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Stripe webhooks not configured"));
        };

        verify_webhook_signature(secret, body, signature).map_err(|e| match e {
            AppError::BadRequest(reason) => {
                tracing::debug!("Malformed Stripe signature header: {}", reason);
                (StatusCode::UNAUTHORIZED, "Invalid signature")
            }
            other => {
                tracing::error!("Signature verification error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Signature verification failed")
            }
        })
    }

    fn parse_event(&self, body: &Bytes) -> Result<PaymentEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        match event.event_type.as_str() {
            "checkout.session.completed" => parse_checkout_session(&event, SessionOutcome::Completed),
            "checkout.session.async_payment_succeeded" => {
                parse_checkout_session(&event, SessionOutcome::AsyncSucceeded)
            }
            "checkout.session.async_payment_failed" => {
                parse_checkout_session(&event, SessionOutcome::AsyncFailed)
            }
            "checkout.session.expired" => parse_checkout_session(&event, SessionOutcome::Expired),
            "payment_intent.payment_failed" => parse_payment_failed(&event),
            "charge.refunded" => parse_charge_refunded(&event),
            _ => Ok(PaymentEvent::Ignored),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SessionOutcome {
    Completed,
    AsyncSucceeded,
    AsyncFailed,
    Expired,
}

fn parse_checkout_session(
    event: &StripeWebhookEvent,
    outcome: SessionOutcome,
) -> Result<PaymentEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    let customer_email = session
        .customer_details
        .as_ref()
        .and_then(|d| d.email.clone())
        .or(session.customer_email.clone());

    let data = PaymentEventData {
        event_id: event.id.clone(),
        session_id: Some(session.id.clone()),
        payment_intent_id: session.payment_intent.clone(),
        order_id: session.metadata.order_id.clone(),
        customer_email,
    };

    Ok(match outcome {
        // Delayed payment methods complete the session unpaid; wait for async_payment_succeeded
        SessionOutcome::Completed if session.payment_status.as_deref() != Some("paid") => {
            tracing::info!(
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "Checkout completed without payment yet"
            );
            PaymentEvent::Ignored
        }
        SessionOutcome::Completed | SessionOutcome::AsyncSucceeded => {
            PaymentEvent::PaymentSucceeded(data)
        }
        SessionOutcome::AsyncFailed => PaymentEvent::PaymentFailed(data),
        SessionOutcome::Expired => PaymentEvent::SessionExpired(data),
    })
}

/// A declined attempt inside an open Checkout session. The buyer can still
/// retry with another card, so the order stays pending until the session
/// completes or expires.
fn parse_payment_failed(event: &StripeWebhookEvent) -> Result<PaymentEvent, WebhookResult> {
    let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse payment intent: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid payment intent")
        })?;

    tracing::info!(
        payment_intent_id = %intent.id,
        order_id = ?intent.metadata.order_id,
        "Payment attempt declined, session still open"
    );
    Ok(PaymentEvent::Ignored)
}

fn parse_charge_refunded(event: &StripeWebhookEvent) -> Result<PaymentEvent, WebhookResult> {
    let charge: StripeCharge = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse charge: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid charge")
    })?;

    // Partial refunds leave the order and its tickets alone
    if !charge.refunded {
        tracing::info!(charge_id = %charge.id, "Partial refund, order unchanged");
        return Ok(PaymentEvent::Ignored);
    }

    Ok(PaymentEvent::Refunded(PaymentEventData {
        event_id: event.id.clone(),
        session_id: None,
        payment_intent_id: charge.payment_intent,
        order_id: charge.metadata.order_id,
        customer_email: None,
    }))
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_webhook(&StripeWebhookProvider, &state, headers, body).await
}
