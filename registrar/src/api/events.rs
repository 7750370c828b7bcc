//! Event scheduling, registration, cancellation, and attendance routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregates::RegistrationAction;
use crate::api::{ApiError, AppState, CallerId, send_command};
use crate::error::RegistrationError;
use crate::types::{
    CampusEvent, EventCore, EventId, EventKind, Money, PaymentId, PaymentMethod, PaymentStatus,
    RegistrableEvent, RegistrationStatus, Trip, UserId, Workshop,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub(crate) enum ScheduleEventRequest {
    #[serde(rename = "workshop")]
    Workshop {
        title: String,
        capacity: u32,
        price_cents: u64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        instructor: String,
        location: String,
    },
    #[serde(rename = "trip")]
    Trip {
        title: String,
        capacity: u32,
        price_cents: u64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        destination: String,
        meeting_point: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventResponse {
    id: EventId,
    kind: EventKind,
    title: String,
    capacity: u32,
    registered_count: u32,
    waitlist_length: usize,
    price_cents: u64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl EventResponse {
    fn from_event(event: &CampusEvent) -> Self {
        let core = event.core();
        Self {
            id: core.id,
            kind: event.kind(),
            title: core.title.clone(),
            capacity: core.capacity,
            registered_count: core.registered_count,
            waitlist_length: core
                .roster
                .iter()
                .filter(|r| r.status == RegistrationStatus::Waitlisted)
                .count(),
            price_cents: core.price.cents(),
            starts_at: core.starts_at,
            ends_at: core.ends_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest {
    payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum RegisterResponse {
    #[serde(rename_all = "camelCase")]
    Admitted {
        status: RegistrationStatus,
        amount_paid_cents: u64,
    },
    #[serde(rename_all = "camelCase")]
    PaymentPending {
        status: &'static str,
        payment_id: PaymentId,
        client_secret: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelResponse {
    refund_amount_cents: u64,
    new_balance_cents: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmResponse {
    payment_id: PaymentId,
    status: PaymentStatus,
}

fn parse_kind(kind: &str) -> Result<EventKind, ApiError> {
    match kind {
        "workshop" => Ok(EventKind::Workshop),
        "trip" => Ok(EventKind::Trip),
        other => Err(RegistrationError::validation(format!("unknown event kind: {other}")).into()),
    }
}

/// Look up an event, checking the path's kind segment matches.
async fn resolve_event(
    state: &AppState,
    kind: &str,
    id: Uuid,
) -> Result<CampusEvent, ApiError> {
    let kind = parse_kind(kind)?;
    let event_id = EventId::from_uuid(id);
    state
        .store
        .state(|s| s.events.get(&event_id).cloned())
        .await
        .filter(|e| e.kind() == kind)
        .ok_or_else(|| RegistrationError::EventNotFound { event: event_id }.into())
}

pub(crate) async fn schedule_event(
    State(state): State<AppState>,
    Json(request): Json<ScheduleEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let id = EventId::new();
    let event = match request {
        ScheduleEventRequest::Workshop {
            title,
            capacity,
            price_cents,
            starts_at,
            ends_at,
            instructor,
            location,
        } => CampusEvent::Workshop(Workshop {
            core: EventCore::new(id, title, capacity, Money::from_cents(price_cents), starts_at, ends_at),
            instructor,
            location,
        }),
        ScheduleEventRequest::Trip {
            title,
            capacity,
            price_cents,
            starts_at,
            ends_at,
            destination,
            meeting_point,
        } => CampusEvent::Trip(Trip {
            core: EventCore::new(id, title, capacity, Money::from_cents(price_cents), starts_at, ends_at),
            destination,
            meeting_point,
        }),
    };

    if let Some(err) = send_command(&state.store, RegistrationAction::ScheduleEvent { event }).await
    {
        return Err(err.into());
    }

    let scheduled = state
        .store
        .state(|s| s.events.get(&id).map(EventResponse::from_event))
        .await
        .ok_or(RegistrationError::EventNotFound { event: id })?;

    Ok((StatusCode::CREATED, Json(scheduled)))
}

pub(crate) async fn get_event(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = resolve_event(&state, &kind, id).await?;
    Ok(Json(EventResponse::from_event(&event)))
}

pub(crate) async fn register(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let event = resolve_event(&state, &kind, id).await?;
    let event_id = event.core().id;
    let method = request.payment_method.unwrap_or(PaymentMethod::Wallet);

    let rejection = send_command(
        &state.store,
        RegistrationAction::Register {
            user,
            event: event_id,
            method,
        },
    )
    .await;
    if let Some(err) = rejection {
        return Err(err.into());
    }

    registration_outcome(&state, user, event_id).await
}

/// Read back what the accepted register command produced.
async fn registration_outcome(
    state: &AppState,
    user: UserId,
    event_id: EventId,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let outcome = state
        .store
        .state(move |s| {
            if let Some(reg) = s.active_registration(user, event_id) {
                return Some(RegisterResponse::Admitted {
                    status: reg.status,
                    amount_paid_cents: reg.amount_paid.cents(),
                });
            }
            s.payments
                .values()
                .find(|p| {
                    p.user == user && p.event == event_id && p.status == PaymentStatus::Pending
                })
                .map(|payment| RegisterResponse::PaymentPending {
                    status: "payment_pending",
                    payment_id: payment.id,
                    client_secret: payment.client_secret.clone().unwrap_or_default(),
                })
        })
        .await;

    match outcome {
        Some(response @ RegisterResponse::Admitted { .. }) => {
            Ok((StatusCode::CREATED, Json(response)))
        },
        Some(response) => Ok((StatusCode::ACCEPTED, Json(response))),
        None => Err(RegistrationError::invariant("register command left no outcome").into()),
    }
}

pub(crate) async fn cancel(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<CancelResponse>, ApiError> {
    let event = resolve_event(&state, &kind, id).await?;
    let event_id = event.core().id;

    if let Some(err) =
        send_command(&state.store, RegistrationAction::Cancel { user, event: event_id }).await
    {
        return Err(err.into());
    }

    let response = state
        .store
        .state(move |s| {
            let refund = s
                .events
                .get(&event_id)
                .and_then(|e| {
                    e.core()
                        .roster
                        .iter()
                        .filter(|r| r.user == user && r.status == RegistrationStatus::Cancelled)
                        .max_by_key(|r| r.cancelled_at)
                        .map(|r| r.amount_paid.cents())
                })
                .unwrap_or(0);
            let balance = s.users.get(&user).map_or(0, |a| a.balance().cents());
            CancelResponse {
                refund_amount_cents: refund,
                new_balance_cents: balance,
            }
        })
        .await;

    Ok(Json(response))
}

pub(crate) async fn mark_attended(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let event = resolve_event(&state, &kind, id).await?;

    let rejection = send_command(
        &state.store,
        RegistrationAction::MarkAttended {
            user,
            event: event.core().id,
        },
    )
    .await;
    match rejection {
        Some(err) => Err(err.into()),
        None => Ok(StatusCode::NO_CONTENT),
    }
}

/// Client-driven confirmation after completing the card flow.
pub(crate) async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let payment_id = PaymentId::from_uuid(id);

    if let Some(err) = send_command(
        &state.store,
        RegistrationAction::ConfirmGatewayPayment { payment: payment_id },
    )
    .await
    {
        return Err(err.into());
    }

    let status = state
        .store
        .state(move |s| s.payments.get(&payment_id).map(|p| p.status))
        .await
        .ok_or(RegistrationError::PaymentNotFound { payment: payment_id })?;

    Ok(Json(ConfirmResponse {
        payment_id,
        status,
    }))
}
