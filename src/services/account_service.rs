//! Account service - Handles account-related business logic.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Account, LedgerSummary};
use crate::errors::{AppError, AppResult, OptionExt};
use crate::infra::{AccountRepository, Session};
use crate::types::{Paginated, PaginationParams};

/// Account service trait for dependency injection.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Open an account; owners are unique
    async fn open_account(
        &self,
        session: &mut Session,
        owner: String,
        initial_balance: i64,
    ) -> AppResult<Account>;

    async fn get_account(&self, session: &mut Session, id: Uuid) -> AppResult<Account>;

    async fn list_accounts(
        &self,
        session: &mut Session,
        params: &PaginationParams,
    ) -> AppResult<Paginated<Account>>;

    async fn deposit(&self, session: &mut Session, id: Uuid, amount: i64) -> AppResult<Account>;

    /// Fails with a validation error when funds are insufficient
    async fn withdraw(&self, session: &mut Session, id: Uuid, amount: i64) -> AppResult<Account>;

    /// Account count and total balance
    async fn summarize(&self, session: &mut Session) -> AppResult<LedgerSummary>;
}

/// Concrete implementation of AccountService.
pub struct AccountManager {
    accounts: Arc<dyn AccountRepository>,
}

impl AccountManager {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    async fn locked(&self, session: &mut Session, id: Uuid) -> AppResult<Account> {
        self.accounts
            .find_for_update(session, id)
            .await?
            .ok_or_not_found()
    }
}

#[async_trait]
impl AccountService for AccountManager {
    async fn open_account(
        &self,
        session: &mut Session,
        owner: String,
        initial_balance: i64,
    ) -> AppResult<Account> {
        let account = Account::open(owner, initial_balance)?;

        if self
            .accounts
            .find_by_owner(session, &account.owner)
            .await?
            .is_some()
        {
            return Err(AppError::conflict("Account"));
        }

        let account = self.accounts.create(session, &account).await?;
        tracing::info!(account_id = %account.id, "Account opened");
        Ok(account)
    }

    async fn get_account(&self, session: &mut Session, id: Uuid) -> AppResult<Account> {
        self.accounts.find_by_id(session, id).await?.ok_or_not_found()
    }

    async fn list_accounts(
        &self,
        session: &mut Session,
        params: &PaginationParams,
    ) -> AppResult<Paginated<Account>> {
        let total = self.accounts.count(session).await?;
        let accounts = self
            .accounts
            .list(session, params.limit(), params.offset())
            .await?;

        Ok(Paginated::new(accounts, params.page, params.limit(), total))
    }

    async fn deposit(&self, session: &mut Session, id: Uuid, amount: i64) -> AppResult<Account> {
        let mut account = self.locked(session, id).await?;
        account.credit(amount)?;
        self.accounts.update_balance(session, &account).await
    }

    async fn withdraw(&self, session: &mut Session, id: Uuid, amount: i64) -> AppResult<Account> {
        let mut account = self.locked(session, id).await?;
        account.debit(amount)?;
        self.accounts.update_balance(session, &account).await
    }

    async fn summarize(&self, session: &mut Session) -> AppResult<LedgerSummary> {
        let accounts = self.accounts.count(session).await?;
        let total_balance = self.accounts.total_balance(session).await?;
        Ok(LedgerSummary {
            accounts,
            total_balance,
        })
    }
}
