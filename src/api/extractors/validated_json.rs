//! Request body extractor for the ledger's write endpoints.
//!
//! Bodies are parsed and validated before the handler runs, so a malformed
//! or out-of-range request is answered with 400 without ever borrowing a
//! database connection.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::errors::AppError;

/// JSON body that has passed its `validator` rules.
///
/// Unparseable JSON becomes [`AppError::BadRequest`]; rule violations become
/// [`AppError::Validation`] with every field message joined.
///
/// ```rust,ignore
/// async fn deposit(
///     State(state): State<AppState>,
///     Path(id): Path<Uuid>,
///     ValidatedJson(payload): ValidatedJson<AmountRequest>,
/// ) -> AppResult<Json<AccountResponse>> {
///     // payload.amount >= 1 here; the unit of work starts after this point
/// }
/// ```
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        value
            .validate()
            .map_err(|e| AppError::validation(format_validation_errors(&e)))?;

        Ok(ValidatedJson(value))
    }
}

/// Field messages, or `<field> is invalid` for rules without one.
fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field))
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Deposit {
        #[validate(range(min = 1, message = "Amount must be positive"))]
        amount: i64,
        #[validate(length(min = 1))]
        owner: String,
    }

    fn request(body: &str) -> Request {
        Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_formats_custom_and_default_messages() {
        let deposit = Deposit {
            amount: 0,
            owner: String::new(),
        };
        let errors = deposit.validate().unwrap_err();
        let message = format_validation_errors(&errors);

        assert!(message.contains("Amount must be positive"));
        assert!(message.contains("owner is invalid"));
    }

    #[tokio::test]
    async fn test_accepts_valid_body() {
        let ValidatedJson(deposit) =
            ValidatedJson::<Deposit>::from_request(request(r#"{"amount": 5, "owner": "alice"}"#), &())
                .await
                .unwrap();
        assert_eq!(deposit.amount, 5);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let result = ValidatedJson::<Deposit>::from_request(request(r#"{"amount": "#), &()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_rule_violation_is_validation_error() {
        let result =
            ValidatedJson::<Deposit>::from_request(request(r#"{"amount": 0, "owner": "bob"}"#), &())
                .await;
        assert!(matches!(result, Err(AppError::Validation(msg)) if msg == "Amount must be positive"));
    }
}
