//! Transfer handlers.

use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::api::extractors::ValidatedJson;
use crate::api::AppState;
use crate::domain::TransferResponse;
use crate::errors::AppResult;
use crate::with_transaction;

/// Transfer request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TransferRequest {
    pub from_account: Uuid,
    pub to_account: Uuid,
    /// Amount in minor units
    #[validate(range(min = 1, message = "Amount must be positive"))]
    #[schema(example = 2500)]
    pub amount: i64,
}

/// Create transfer routes
pub fn transfer_routes() -> Router<AppState> {
    Router::new().route("/", post(create_transfer))
}

/// Move funds between two accounts
///
/// Runs in a serializable transaction; a conflicting concurrent transfer
/// surfaces as 409 and may be retried by the client.
#[utoipa::path(
    post,
    path = "/transfers",
    tag = "Transfers",
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer recorded", body = TransferResponse),
        (status = 400, description = "Validation error or insufficient funds"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Concurrent modification")
    )
)]
pub async fn create_transfer(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<TransferRequest>,
) -> AppResult<(StatusCode, Json<TransferResponse>)> {
    let service = state.transfer_service.clone();
    let transfer = with_transaction!(state.uow, transaction_serializable, |session| {
        service
            .transfer(session, payload.from_account, payload.to_account, payload.amount)
            .await
    })?;

    Ok((StatusCode::CREATED, Json(TransferResponse::from(transfer))))
}
