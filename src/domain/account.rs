//! Account aggregate.
//!
//! Balances are integer minor units (cents). `version` is bumped on every
//! balance change and guards concurrent writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner: String,
    pub balance: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new account with an optional starting balance.
    pub fn open(owner: impl Into<String>, initial_balance: i64) -> Result<Self, DomainError> {
        let owner = owner.into().trim().to_string();
        if owner.is_empty() {
            return Err(DomainError::BlankOwner);
        }
        if initial_balance < 0 {
            return Err(DomainError::NegativeBalance);
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            owner,
            balance: initial_balance,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn credit(&mut self, amount: i64) -> Result<(), DomainError> {
        ensure_positive(amount)?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(DomainError::BalanceOverflow(self.id))?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn debit(&mut self, amount: i64) -> Result<(), DomainError> {
        ensure_positive(amount)?;
        if amount > self.balance {
            return Err(DomainError::InsufficientFunds {
                account_id: self.id,
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}

pub(crate) fn ensure_positive(amount: i64) -> Result<(), DomainError> {
    if amount <= 0 {
        return Err(DomainError::InvalidAmount(amount));
    }
    Ok(())
}

/// Account response (safe to return to client)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    /// Unique account identifier
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    /// Account holder
    #[schema(example = "alice")]
    pub owner: String,
    /// Balance in minor units
    #[schema(example = 15000)]
    pub balance: i64,
    /// Optimistic concurrency version
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            owner: account.owner,
            balance: account.balance,
            version: account.version,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Aggregate figures across all accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerSummary {
    pub accounts: u64,
    /// Sum of all balances in minor units
    pub total_balance: i64,
}
