use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};

use super::{CheckoutSessionCreated, CheckoutSessionRequest, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_CHECKOUT_SESSIONS_URL: &str = "https://api.stripe.com/v1/checkout/sessions";

/// Maximum age of a webhook timestamp before it's rejected (in seconds).
/// Stripe recommends 300 seconds (5 minutes).
pub const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Stripe refuses session expiry less than 30 minutes out.
const MIN_SESSION_EXPIRY_SECS: i64 = 30 * 60;

/// Clock skew allowed for timestamps from the future.
const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Create a one-off Stripe checkout session for an order.
    ///
    /// Prices are sent inline (`price_data`) since tiers and fees are priced by
    /// us, not configured in the Stripe dashboard. The order id is attached to
    /// both the session and the payment intent so every later event can be
    /// traced back to the order.
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionCreated> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("client_reference_id".into(), request.order_id.clone()),
            ("metadata[order_id]".into(), request.order_id.clone()),
            (
                "payment_intent_data[metadata][order_id]".into(),
                request.order_id.clone(),
            ),
        ];

        // Shorter sessions than Stripe allows keep Stripe's default expiry; a
        // payment landing after the hold lapsed is refused at reconciliation.
        if request.expires_at - chrono::Utc::now().timestamp() >= MIN_SESSION_EXPIRY_SECS {
            form.push(("expires_at".into(), request.expires_at.to_string()));
        } else {
            tracing::debug!(
                order_id = %request.order_id,
                "Session expiry below Stripe's minimum, relying on hold expiry"
            );
        }

        if let Some(email) = &request.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                request.currency.to_lowercase(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_cents.to_string(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        let response = self
            .client
            .post(STRIPE_CHECKOUT_SESSIONS_URL)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::PaymentSubsystemUnavailable(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::PaymentSubsystemUnavailable(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        let session: CreateCheckoutSessionResponse = response.json().await.map_err(|e| {
            AppError::PaymentSubsystemUnavailable(format!("Failed to parse Stripe response: {}", e))
        })?;

        Ok(CheckoutSessionCreated {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}

impl PaymentGateway for StripeClient {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn create_checkout_session<'a>(
        &'a self,
        request: &'a CheckoutSessionRequest,
    ) -> BoxFuture<'a, Result<CheckoutSessionCreated>> {
        Box::pin(StripeClient::create_checkout_session(self, request))
    }
}

/// Verify a `stripe-signature` header (`t=timestamp,v1=signature`) against the raw body.
///
/// Returns `Ok(false)` for a well-formed header whose signature does not match
/// or whose timestamp is outside the tolerance window, and `Err` for headers
/// that can't be parsed at all.
pub fn verify_webhook_signature(webhook_secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    let sig_v1 = sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let age = chrono::Utc::now().timestamp() - timestamp;

    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    if age < -WEBHOOK_FUTURE_SKEW_SECS {
        tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let expected = compute_signature(webhook_secret, timestamp_str, payload)?;

    // Length is not secret (always 64 hex chars for SHA-256)
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

/// HMAC-SHA256 over `{timestamp}.{payload}`, lowercase hex.
pub fn compute_signature(webhook_secret: &str, timestamp: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    /// Stripe's event id (`evt_...`), the deduplication key
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub order_id: Option<String>,
}

// ============ checkout.session.* ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

// ============ payment_intent.payment_failed ============

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

// ============ charge.refunded ============

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    /// True once the full amount has been refunded
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub metadata: StripeMetadata,
}
