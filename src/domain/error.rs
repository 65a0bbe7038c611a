//! Domain rule violations.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Initial balance cannot be negative")]
    NegativeBalance,

    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: Uuid,
        balance: i64,
        requested: i64,
    },

    #[error("Balance overflow on account {0}")]
    BalanceOverflow(Uuid),

    #[error("Cannot transfer to the same account")]
    SameAccount,

    #[error("Owner must not be blank")]
    BlankOwner,
}
