//! Account and wallet routes.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregates::RegistrationAction;
use crate::api::{ApiError, AppState, CallerId, send_command};
use crate::error::RegistrationError;
use crate::types::{Transaction, TransactionKind, UserId};

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAccountRequest {
    name: String,
    /// Optional caller-chosen id; generated when absent.
    id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpenAccountResponse {
    user_id: UserId,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DepositRequest {
    amount_cents: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionView {
    id: String,
    kind: TransactionKind,
    amount_cents: u64,
    signed_cents: i64,
    description: String,
    recorded_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            kind: tx.kind,
            amount_cents: tx.amount.cents(),
            signed_cents: tx.signed_cents(),
            description: tx.description.clone(),
            recorded_at: tx.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WalletResponse {
    balance_cents: u64,
    transaction_history: Vec<TransactionView>,
}

pub(crate) async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<OpenAccountResponse>), ApiError> {
    let user = request.id.map_or_else(UserId::new, UserId::from_uuid);

    let rejection = send_command(
        &state.store,
        RegistrationAction::OpenAccount {
            user,
            name: request.name.clone(),
        },
    )
    .await;
    if let Some(err) = rejection {
        return Err(err.into());
    }

    Ok((
        StatusCode::CREATED,
        Json(OpenAccountResponse {
            user_id: user,
            name: request.name,
        }),
    ))
}

pub(crate) async fn get_wallet(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<WalletResponse>, ApiError> {
    let response = state
        .store
        .state(move |s| {
            s.users.get(&user).map(|account| WalletResponse {
                balance_cents: account.balance().cents(),
                transaction_history: account.transactions.iter().map(TransactionView::from).collect(),
            })
        })
        .await
        .ok_or(RegistrationError::UserNotFound { user })?;

    Ok(Json(response))
}

pub(crate) async fn deposit(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Json(request): Json<DepositRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let rejection = send_command(
        &state.store,
        RegistrationAction::DepositFunds {
            user,
            amount: crate::types::Money::from_cents(request.amount_cents),
        },
    )
    .await;
    if let Some(err) = rejection {
        return Err(err.into());
    }

    get_wallet(State(state), CallerId(user)).await
}
