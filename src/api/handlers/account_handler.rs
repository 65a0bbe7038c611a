//! Account handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::api::extractors::ValidatedJson;
use crate::api::AppState;
use crate::config::TRANSFER_HISTORY_LIMIT;
use crate::domain::{AccountResponse, TransferResponse};
use crate::errors::AppResult;
use crate::types::{Paginated, PaginationParams};
use crate::with_transaction;

/// Account opening request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OpenAccountRequest {
    /// Unique account holder name
    #[validate(length(min = 1, max = 100, message = "Owner must be 1-100 characters"))]
    #[schema(example = "alice")]
    pub owner: String,
    /// Starting balance in minor units
    #[serde(default)]
    #[validate(range(min = 0, message = "Initial balance cannot be negative"))]
    #[schema(example = 10000)]
    pub initial_balance: i64,
}

/// Deposit or withdrawal request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AmountRequest {
    /// Amount in minor units
    #[validate(range(min = 1, message = "Amount must be positive"))]
    #[schema(example = 2500)]
    pub amount: i64,
}

/// Create account routes
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(open_account).get(list_accounts))
        .route("/:id", get(get_account))
        .route("/:id/deposit", post(deposit))
        .route("/:id/withdraw", post(withdraw))
        .route("/:id/transfers", get(account_transfers))
}

/// Open a new account
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "Accounts",
    request_body = OpenAccountRequest,
    responses(
        (status = 201, description = "Account opened", body = AccountResponse),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Owner already has an account"),
        (status = 503, description = "No database connection available")
    )
)]
pub async fn open_account(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<OpenAccountRequest>,
) -> AppResult<(StatusCode, Json<AccountResponse>)> {
    let service = state.account_service.clone();
    let account = with_transaction!(state.uow, |session| {
        service
            .open_account(session, payload.owner, payload.initial_balance)
            .await
    })?;

    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

/// List accounts (paginated)
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "Accounts",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of accounts", body = [AccountResponse])
    )
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<Paginated<AccountResponse>>> {
    let service = state.account_service.clone();
    let page = with_transaction!(state.uow, transaction_read_only, |session| {
        service.list_accounts(session, &params).await
    })?;

    Ok(Json(page.map(AccountResponse::from)))
}

/// Get account by ID
#[utoipa::path(
    get,
    path = "/accounts/{id}",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Account found", body = AccountResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AccountResponse>> {
    let service = state.account_service.clone();
    let account = with_transaction!(state.uow, transaction_read_only, |session| {
        service.get_account(session, id).await
    })?;

    Ok(Json(AccountResponse::from(account)))
}

/// Deposit funds
#[utoipa::path(
    post,
    path = "/accounts/{id}/deposit",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountResponse),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Concurrent modification")
    )
)]
pub async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<AmountRequest>,
) -> AppResult<Json<AccountResponse>> {
    let service = state.account_service.clone();
    let account = with_transaction!(state.uow, |session| {
        service.deposit(session, id, payload.amount).await
    })?;

    Ok(Json(AccountResponse::from(account)))
}

/// Withdraw funds
#[utoipa::path(
    post,
    path = "/accounts/{id}/withdraw",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountResponse),
        (status = 400, description = "Insufficient funds"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Concurrent modification")
    )
)]
pub async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<AmountRequest>,
) -> AppResult<Json<AccountResponse>> {
    let service = state.account_service.clone();
    let account = with_transaction!(state.uow, |session| {
        service.withdraw(session, id, payload.amount).await
    })?;

    Ok(Json(AccountResponse::from(account)))
}

/// Recent transfers for an account
#[utoipa::path(
    get,
    path = "/accounts/{id}/transfers",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Transfers, newest first", body = [TransferResponse]),
        (status = 404, description = "Account not found")
    )
)]
pub async fn account_transfers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TransferResponse>>> {
    let service = state.transfer_service.clone();
    let transfers = with_transaction!(state.uow, transaction_read_only, |session| {
        service.history(session, id, TRANSFER_HISTORY_LIMIT).await
    })?;

    Ok(Json(transfers.into_iter().map(TransferResponse::from).collect()))
}
