//! Report command - Prints ledger totals.
//!
//! Runs outside any request, so this command is the outer scope that owns
//! the unit of work.

use std::sync::Arc;

use crate::config::Config;
use crate::domain::LedgerSummary;
use crate::errors::AppResult;
use crate::infra::{Database, UnitOfWorkFactory};
use crate::services::{AccountService, ServiceContainer, Services};

/// Execute the report command
pub async fn execute(config: Config) -> AppResult<()> {
    let db = Database::connect_without_migrations(&config).await?;
    let uow = UnitOfWorkFactory::with_defaults(db.provider(), config.transaction_options());

    let result = summarize(&uow, Services::with_stores().accounts()).await;
    db.close().await;

    let summary = result?;
    println!("accounts: {}", summary.accounts);
    println!("total balance: {}", summary.total_balance);
    Ok(())
}

/// Read the summary in one read-only transaction.
pub async fn summarize(
    uow: &UnitOfWorkFactory,
    accounts: Arc<dyn AccountService>,
) -> AppResult<LedgerSummary> {
    uow.transaction_read_only(move |session| {
        Box::pin(async move { accounts.summarize(session).await })
    })
    .await
}
