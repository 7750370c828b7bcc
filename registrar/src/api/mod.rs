//! HTTP API for the registrar.
//!
//! Handlers dispatch commands to the [`Store`] via [`send_command`], which
//! captures each command's rejection under its own reduction's lock.
//! The `x-user-id` header identifies the caller on wallet and
//! registration routes; real deployments put an auth layer in front.

use std::sync::Arc;

use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::{delete, get, post};
use uuid::Uuid;

use registrar_runtime::Store;

use crate::aggregates::{RegistrationAction, RegistrationEnvironment, RegistrationReducer};
use crate::error::RegistrationError;
use crate::types::{RegistrarState, UserId};

pub mod error;
pub mod events;
pub mod wallet;
pub mod webhooks;

pub use error::ApiError;

/// The registrar's store type.
pub type RegistrarStore =
    Store<RegistrarState, RegistrationAction, RegistrationEnvironment, RegistrationReducer>;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    /// The domain store.
    pub store: RegistrarStore,
    /// Secret for verifying gateway webhook signatures.
    pub webhook_secret: Arc<str>,
}

/// Caller identity from the `x-user-id` header.
#[derive(Debug, Clone, Copy)]
pub struct CallerId(pub UserId);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing x-user-id header"))?;
        let uuid: Uuid = raw
            .parse()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "malformed x-user-id header"))?;
        Ok(Self(UserId::from_uuid(uuid)))
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(wallet::open_account))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/deposit", post(wallet::deposit))
        .route("/events", post(events::schedule_event))
        .route("/events/:kind/:id", get(events::get_event))
        .route("/events/:kind/:id/register", post(events::register))
        .route("/events/:kind/:id/cancel", delete(events::cancel))
        .route("/events/:kind/:id/attendance", post(events::mark_attended))
        .route("/payments/:id/confirm", post(events::confirm_payment))
        .route("/webhooks/gateway", post(webhooks::gateway_webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Dispatch a command and capture the rejection it recorded, if any.
///
/// The rejection is read under the same lock as the command's own
/// reduction, so a concurrent request's outcome can never be mistaken for
/// this one's.
pub(crate) async fn send_command(
    store: &RegistrarStore,
    action: RegistrationAction,
) -> Option<RegistrationError> {
    store.send_observing(action, |s| s.last_error.clone()).await
}
