//! Gateway webhook intake.
//!
//! Webhooks are delivered at least once, unsigned bodies are rejected, and
//! both success and failure notifications funnel into the idempotent
//! confirmation path: the reducer asks the gateway for the authoritative
//! intent status rather than trusting the webhook body.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use crate::aggregates::RegistrationAction;
use crate::api::AppState;
use crate::gateway::{WebhookEvent, verify_webhook_signature};

const SIGNATURE_HEADER: &str = "x-gateway-signature";

pub(crate) async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("Webhook rejected: missing signature header");
        return StatusCode::UNAUTHORIZED;
    };
    if !verify_webhook_signature(state.webhook_secret.as_bytes(), &body, signature) {
        warn!("Webhook rejected: bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "Webhook rejected: unparseable body");
            return StatusCode::BAD_REQUEST;
        },
    };

    let Some(payment_id) = state
        .store
        .state(|s| s.payment_for_intent(&event.intent_id).map(|p| p.id))
        .await
    else {
        // Unknown intent: acknowledge so the gateway stops redelivering.
        debug!(intent = %event.intent_id, "Webhook for unknown intent ignored");
        return StatusCode::OK;
    };

    debug!(intent = %event.intent_id, payment = %payment_id, kind = ?event.event_type, "Webhook accepted");
    state
        .store
        .send(RegistrationAction::ConfirmGatewayPayment { payment: payment_id })
        .await;

    StatusCode::OK
}
