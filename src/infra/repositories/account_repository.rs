//! Account repository with optimistic version checks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::Account;
use crate::errors::{AppError, AppResult};
use crate::infra::db::{DbError, Statement};
use crate::infra::Session;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

const SELECT_ACCOUNT: &str =
    "SELECT id, owner, balance, version, created_at, updated_at FROM accounts";

/// Account repository trait for dependency injection.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, session: &mut Session, id: Uuid) -> AppResult<Option<Account>>;

    /// Find and row-lock an account until the session ends
    async fn find_for_update(&self, session: &mut Session, id: Uuid) -> AppResult<Option<Account>>;

    async fn find_by_owner(&self, session: &mut Session, owner: &str) -> AppResult<Option<Account>>;

    /// Insert a new account
    async fn create(&self, session: &mut Session, account: &Account) -> AppResult<Account>;

    /// Persist a changed balance, guarded by the account's version.
    ///
    /// A version mismatch invalidates the session and fails with
    /// `StaleState`.
    async fn update_balance(&self, session: &mut Session, account: &Account) -> AppResult<Account>;

    async fn list(&self, session: &mut Session, limit: u64, offset: u64) -> AppResult<Vec<Account>>;

    async fn count(&self, session: &mut Session) -> AppResult<u64>;

    async fn total_balance(&self, session: &mut Session) -> AppResult<i64>;
}

/// Concrete implementation of AccountRepository
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountStore;

impl AccountStore {
    pub fn new() -> Self {
        Self
    }

    async fn find_one(&self, session: &mut Session, statement: Statement) -> AppResult<Option<Account>> {
        match session.fetch_optional(statement).await? {
            Some(row) => Ok(Some(row.decode()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountRepository for AccountStore {
    async fn find_by_id(&self, session: &mut Session, id: Uuid) -> AppResult<Option<Account>> {
        let statement = Statement::new(format!("{SELECT_ACCOUNT} WHERE id = $1")).bind(id);
        self.find_one(session, statement).await
    }

    async fn find_for_update(&self, session: &mut Session, id: Uuid) -> AppResult<Option<Account>> {
        let statement =
            Statement::new(format!("{SELECT_ACCOUNT} WHERE id = $1 FOR UPDATE")).bind(id);
        self.find_one(session, statement).await
    }

    async fn find_by_owner(&self, session: &mut Session, owner: &str) -> AppResult<Option<Account>> {
        let statement = Statement::new(format!("{SELECT_ACCOUNT} WHERE owner = $1")).bind(owner);
        self.find_one(session, statement).await
    }

    async fn create(&self, session: &mut Session, account: &Account) -> AppResult<Account> {
        let statement = Statement::new(
            "INSERT INTO accounts (id, owner, balance, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(account.id)
        .bind(account.owner.as_str())
        .bind(account.balance)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at);

        match session.execute(statement).await {
            Ok(_) => Ok(account.clone()),
            Err(DbError::UniqueViolation(_)) => Err(AppError::conflict("Account")),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_balance(&self, session: &mut Session, account: &Account) -> AppResult<Account> {
        let statement = Statement::new(
            "UPDATE accounts SET balance = $1, version = version + 1, updated_at = $2 \
             WHERE id = $3 AND version = $4",
        )
        .bind(account.balance)
        .bind(account.updated_at)
        .bind(account.id)
        .bind(account.version);

        let result = session.execute(statement).await?;
        if result.rows_affected == 0 {
            let reason = format!(
                "account {} changed since version {}",
                account.id, account.version
            );
            session.invalidate(reason.clone());
            return Err(AppError::stale(reason));
        }

        Ok(Account {
            version: account.version + 1,
            ..account.clone()
        })
    }

    async fn list(&self, session: &mut Session, limit: u64, offset: u64) -> AppResult<Vec<Account>> {
        let statement =
            Statement::new(format!("{SELECT_ACCOUNT} ORDER BY created_at, id LIMIT $1 OFFSET $2"))
                .bind(limit as i64)
                .bind(offset as i64);

        session
            .fetch_all(statement)
            .await?
            .into_iter()
            .map(|row| row.decode().map_err(AppError::from))
            .collect()
    }

    async fn count(&self, session: &mut Session) -> AppResult<u64> {
        let row = session
            .fetch_one(Statement::new("SELECT COUNT(*) AS count FROM accounts"))
            .await?;
        Ok(row.get::<i64>("count")?.max(0) as u64)
    }

    async fn total_balance(&self, session: &mut Session) -> AppResult<i64> {
        let row = session
            .fetch_one(Statement::new(
                "SELECT COALESCE(SUM(balance), 0)::BIGINT AS total FROM accounts",
            ))
            .await?;
        Ok(row.get::<i64>("total")?)
    }
}
