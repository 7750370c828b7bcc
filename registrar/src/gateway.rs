//! External payment gateway: intent creation, confirmation, webhooks.
//!
//! The reducer talks to the gateway through the [`PaymentGateway`] trait so
//! production code can use [`HttpGateway`] while tests script a
//! [`MockGateway`]. Intent creation is retried with backoff; confirmation
//! never is; it re-enters through the idempotent confirmation path.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use registrar_runtime::RetryPolicy;

use crate::types::{EventId, PaymentId, UserId};

/// Boxed future returned by gateway calls; keeps the trait object-safe.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Errors from the payment gateway or its transport.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway could not be reached.
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its deadline.
    #[error("Gateway request timed out")]
    Timeout,

    /// The gateway answered with an error.
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
}

/// Authoritative status of a payment intent, as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Awaiting the cardholder.
    Pending,
    /// Funds captured.
    Succeeded,
    /// Charge declined.
    Failed,
    /// Intent abandoned or voided.
    Canceled,
}

/// A freshly created payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway-side intent id.
    pub intent_id: String,
    /// Secret the frontend uses to complete the card flow.
    pub client_secret: String,
}

/// Metadata attached to an intent so webhooks can be traced back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    /// The paying user.
    pub user: UserId,
    /// The event being paid for.
    pub event: EventId,
    /// Our payment record.
    pub payment: PaymentId,
}

/// Client for the external card payment provider.
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for `amount_cents`.
    fn create_intent(
        &self,
        amount_cents: u64,
        currency: &str,
        metadata: IntentMetadata,
    ) -> GatewayFuture<'_, PaymentIntent>;

    /// Retrieve the authoritative status of an intent.
    fn retrieve_intent(&self, intent_id: &str) -> GatewayFuture<'_, IntentStatus>;
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// Webhook notification types the gateway delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// The intent's charge succeeded.
    PaymentSucceeded,
    /// The intent's charge failed.
    PaymentFailed,
}

/// Parsed webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    /// The intent it happened to.
    pub intent_id: String,
}

/// Verify a webhook's HMAC-SHA256 signature over the raw payload.
///
/// The gateway signs the body with the shared webhook secret and sends the
/// hex digest in a header. Comparison is constant-time.
#[must_use]
pub fn verify_webhook_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Compute the signature a webhook sender would attach to `payload`.
#[must_use]
pub fn sign_webhook_payload(secret: &[u8], payload: &[u8]) -> String {
    Hmac::<Sha256>::new_from_slice(secret).map_or_else(
        |_| String::new(),
        |mut mac| {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        },
    )
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Gateway client over HTTP.
///
/// Intent creation is retried per the [`RetryPolicy`]; every request has a
/// bounded timeout so a hung provider cannot hold a registration open
/// forever.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct CreateIntentRequest<'a> {
    amount: u64,
    currency: &'a str,
    metadata: IntentMetadata,
}

#[derive(Deserialize)]
struct CreateIntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct RetrieveIntentResponse {
    status: IntentStatus,
}

impl HttpGateway {
    /// Build a client for the provider at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unreachable`] when the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
        })
    }

    fn classify(err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }

    async fn post_intent(
        &self,
        amount_cents: u64,
        currency: &str,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CreateIntentRequest {
                amount: amount_cents,
                currency,
                metadata,
            })
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {body}")));
        }

        let body: CreateIntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;

        Ok(PaymentIntent {
            intent_id: body.id,
            client_secret: body.client_secret,
        })
    }
}

impl PaymentGateway for HttpGateway {
    fn create_intent(
        &self,
        amount_cents: u64,
        currency: &str,
        metadata: IntentMetadata,
    ) -> GatewayFuture<'_, PaymentIntent> {
        let currency = currency.to_string();
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                match self.post_intent(amount_cents, &currency, metadata).await {
                    Ok(intent) => {
                        info!(
                            intent = %intent.intent_id,
                            payment = %metadata.payment,
                            "Payment intent created"
                        );
                        return Ok(intent);
                    },
                    // Provider-side rejections are deterministic.
                    Err(err @ GatewayError::Rejected(_)) => return Err(err),
                    Err(err) => {
                        attempt += 1;
                        if !self.retry.should_retry(attempt) {
                            warn!(error = %err, attempts = attempt, "Intent creation gave up");
                            return Err(err);
                        }
                        let delay = self.retry.delay_for_attempt(attempt - 1);
                        debug!(error = %err, attempt, delay_ms = delay.as_millis(), "Retrying intent creation");
                        tokio::time::sleep(delay).await;
                    },
                }
            }
        })
    }

    fn retrieve_intent(&self, intent_id: &str) -> GatewayFuture<'_, IntentStatus> {
        let intent_id = intent_id.to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/v1/payment_intents/{intent_id}", self.base_url))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| Self::classify(&e))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(GatewayError::Rejected(status.to_string()));
            }

            let body: RetrieveIntentResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Rejected(e.to_string()))?;

            Ok(body.status)
        })
    }
}

// ---------------------------------------------------------------------------
// Scriptable mock
// ---------------------------------------------------------------------------

/// In-memory gateway for tests and local development.
///
/// Created intents start [`IntentStatus::Pending`]; tests drive them to an
/// outcome with [`MockGateway::resolve`], or flip [`MockGateway::fail_creates`]
/// to simulate an unreachable provider.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<MockGatewayInner>>,
}

#[derive(Default)]
struct MockGatewayInner {
    intents: HashMap<String, IntentStatus>,
    fail_creates: bool,
}

impl MockGateway {
    /// Fresh mock with no intents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_intent` calls fail as unreachable.
    pub fn fail_creates(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_creates = fail;
        }
    }

    /// Script the status an intent will report from now on.
    pub fn resolve(&self, intent_id: &str, status: IntentStatus) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.intents.insert(intent_id.to_string(), status);
        }
    }

    /// Ids of all intents created so far.
    #[must_use]
    pub fn intent_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.intents.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl PaymentGateway for MockGateway {
    fn create_intent(
        &self,
        amount_cents: u64,
        _currency: &str,
        metadata: IntentMetadata,
    ) -> GatewayFuture<'_, PaymentIntent> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut guard = inner
                .lock()
                .map_err(|_| GatewayError::Unreachable("mock poisoned".to_string()))?;
            if guard.fail_creates {
                return Err(GatewayError::Unreachable("mock gateway offline".to_string()));
            }

            let intent_id = format!("mock_intent_{}", Uuid::new_v4().simple());
            guard.intents.insert(intent_id.clone(), IntentStatus::Pending);
            debug!(intent = %intent_id, amount_cents, payment = %metadata.payment, "Mock intent created");

            Ok(PaymentIntent {
                client_secret: format!("{intent_id}_secret"),
                intent_id,
            })
        })
    }

    fn retrieve_intent(&self, intent_id: &str) -> GatewayFuture<'_, IntentStatus> {
        let inner = Arc::clone(&self.inner);
        let intent_id = intent_id.to_string();
        Box::pin(async move {
            let guard = inner
                .lock()
                .map_err(|_| GatewayError::Unreachable("mock poisoned".to_string()))?;
            guard
                .intents
                .get(&intent_id)
                .copied()
                .ok_or_else(|| GatewayError::Rejected(format!("no such intent: {intent_id}")))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn metadata() -> IntentMetadata {
        IntentMetadata {
            user: UserId::new(),
            event: EventId::new(),
            payment: PaymentId::new(),
        }
    }

    #[tokio::test]
    async fn mock_creates_pending_intents() {
        let gateway = MockGateway::new();

        let intent = gateway
            .create_intent(2_500, "usd", metadata())
            .await
            .expect("create intent");

        assert!(intent.intent_id.starts_with("mock_intent_"));
        assert!(intent.client_secret.ends_with("_secret"));

        let status = gateway
            .retrieve_intent(&intent.intent_id)
            .await
            .expect("retrieve intent");
        assert_eq!(status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn mock_scripts_outcomes() {
        let gateway = MockGateway::new();
        let intent = gateway
            .create_intent(2_500, "usd", metadata())
            .await
            .expect("create intent");

        gateway.resolve(&intent.intent_id, IntentStatus::Succeeded);
        let status = gateway
            .retrieve_intent(&intent.intent_id)
            .await
            .expect("retrieve intent");
        assert_eq!(status, IntentStatus::Succeeded);
    }

    #[tokio::test]
    async fn mock_simulates_outage() {
        let gateway = MockGateway::new();
        gateway.fail_creates(true);

        let result = gateway.create_intent(2_500, "usd", metadata()).await;
        assert!(matches!(result, Err(GatewayError::Unreachable(_))));
        assert!(gateway.intent_ids().is_empty());
    }

    #[tokio::test]
    async fn mock_rejects_unknown_intent() {
        let gateway = MockGateway::new();
        let result = gateway.retrieve_intent("mock_intent_missing").await;
        assert!(matches!(result, Err(GatewayError::Rejected(_))));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let secret = b"whsec_test_key";
        let payload = br#"{"type":"payment_succeeded","intent_id":"pi_123"}"#;

        let signature = sign_webhook_payload(secret, payload);
        assert!(verify_webhook_signature(secret, payload, &signature));
    }

    #[test]
    fn webhook_signature_rejects_tampering() {
        let secret = b"whsec_test_key";
        let payload = br#"{"type":"payment_succeeded","intent_id":"pi_123"}"#;
        let signature = sign_webhook_payload(secret, payload);

        let tampered = br#"{"type":"payment_succeeded","intent_id":"pi_999"}"#;
        assert!(!verify_webhook_signature(secret, tampered, &signature));
        assert!(!verify_webhook_signature(b"wrong_secret", payload, &signature));
        assert!(!verify_webhook_signature(secret, payload, "not-hex"));
    }

    #[test]
    fn webhook_payload_parses() {
        let payload = br#"{"type":"payment_failed","intent_id":"pi_123"}"#;
        let event: WebhookEvent = serde_json::from_slice(payload).expect("parse webhook");
        assert_eq!(event.event_type, WebhookEventType::PaymentFailed);
        assert_eq!(event.intent_id, "pi_123");
    }
}
