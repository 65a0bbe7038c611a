//! OpenAPI documentation configuration.
//!
//! Provides Swagger UI for API exploration and testing.

use utoipa::OpenApi;

use crate::api::handlers::{account_handler, transfer_handler};
use crate::domain::{AccountResponse, LedgerSummary, TransferResponse};

/// OpenAPI documentation for the ledger service
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ledger Service",
        version = "0.1.0",
        description = "Accounts and transfers, one database transaction per request",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    paths(
        account_handler::open_account,
        account_handler::list_accounts,
        account_handler::get_account,
        account_handler::deposit,
        account_handler::withdraw,
        account_handler::account_transfers,
        transfer_handler::create_transfer,
    ),
    components(
        schemas(
            AccountResponse,
            TransferResponse,
            LedgerSummary,
            account_handler::OpenAccountRequest,
            account_handler::AmountRequest,
            transfer_handler::TransferRequest,
        )
    ),
    tags(
        (name = "Accounts", description = "Account management"),
        (name = "Transfers", description = "Fund movements between accounts")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/accounts",
            "/accounts/{id}",
            "/accounts/{id}/deposit",
            "/accounts/{id}/withdraw",
            "/accounts/{id}/transfers",
            "/transfers",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
