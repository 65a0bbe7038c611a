//! Transfer service - Moves funds between accounts atomically.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::Transfer;
use crate::errors::{AppResult, OptionExt};
use crate::infra::{AccountRepository, Session, TransferRepository};

#[async_trait]
pub trait TransferService: Send + Sync {
    /// Debit `from`, credit `to` and record the transfer, all in the
    /// caller's session.
    async fn transfer(
        &self,
        session: &mut Session,
        from: Uuid,
        to: Uuid,
        amount: i64,
    ) -> AppResult<Transfer>;

    /// Recent transfers for an existing account
    async fn history(&self, session: &mut Session, account_id: Uuid, limit: u64) -> AppResult<Vec<Transfer>>;
}

pub struct TransferManager {
    accounts: Arc<dyn AccountRepository>,
    transfers: Arc<dyn TransferRepository>,
}

impl TransferManager {
    pub fn new(accounts: Arc<dyn AccountRepository>, transfers: Arc<dyn TransferRepository>) -> Self {
        Self {
            accounts,
            transfers,
        }
    }
}

#[async_trait]
impl TransferService for TransferManager {
    async fn transfer(
        &self,
        session: &mut Session,
        from: Uuid,
        to: Uuid,
        amount: i64,
    ) -> AppResult<Transfer> {
        let transfer = Transfer::new(from, to, amount)?;

        // Lock in id order so opposing transfers cannot deadlock.
        let [first, second] = transfer.lock_order();
        let first = self.accounts.find_for_update(session, first).await?.ok_or_not_found()?;
        let second = self.accounts.find_for_update(session, second).await?.ok_or_not_found()?;

        let (mut source, mut destination) = if first.id == from {
            (first, second)
        } else {
            (second, first)
        };

        source.debit(amount)?;
        destination.credit(amount)?;

        self.accounts.update_balance(session, &source).await?;
        self.accounts.update_balance(session, &destination).await?;
        let transfer = self.transfers.create(session, &transfer).await?;

        tracing::info!(
            transfer_id = %transfer.id,
            from = %transfer.from_account,
            to = %transfer.to_account,
            amount = transfer.amount,
            "Transfer recorded"
        );
        Ok(transfer)
    }

    async fn history(&self, session: &mut Session, account_id: Uuid, limit: u64) -> AppResult<Vec<Transfer>> {
        self.accounts
            .find_by_id(session, account_id)
            .await?
            .ok_or_not_found()?;

        self.transfers.list_for_account(session, account_id, limit).await
    }
}
