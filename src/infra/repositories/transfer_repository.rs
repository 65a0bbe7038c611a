//! Transfer repository.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::Transfer;
use crate::errors::{AppError, AppResult};
use crate::infra::db::Statement;
use crate::infra::Session;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Record a transfer
    async fn create(&self, session: &mut Session, transfer: &Transfer) -> AppResult<Transfer>;

    /// Most recent transfers touching an account, newest first
    async fn list_for_account(
        &self,
        session: &mut Session,
        account_id: Uuid,
        limit: u64,
    ) -> AppResult<Vec<Transfer>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransferStore;

impl TransferStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransferRepository for TransferStore {
    async fn create(&self, session: &mut Session, transfer: &Transfer) -> AppResult<Transfer> {
        let statement = Statement::new(
            "INSERT INTO transfers (id, from_account, to_account, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(transfer.id)
        .bind(transfer.from_account)
        .bind(transfer.to_account)
        .bind(transfer.amount)
        .bind(transfer.created_at);

        session.execute(statement).await?;
        Ok(transfer.clone())
    }

    async fn list_for_account(
        &self,
        session: &mut Session,
        account_id: Uuid,
        limit: u64,
    ) -> AppResult<Vec<Transfer>> {
        let statement = Statement::new(
            "SELECT id, from_account, to_account, amount, created_at FROM transfers \
             WHERE from_account = $1 OR to_account = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(account_id)
        .bind(limit as i64);

        session
            .fetch_all(statement)
            .await?
            .into_iter()
            .map(|row| row.decode().map_err(AppError::from))
            .collect()
    }
}
