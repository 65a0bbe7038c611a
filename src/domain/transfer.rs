//! Transfer record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::account::ensure_positive;
use super::DomainError;

/// A completed movement of funds between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub from_account: Uuid,
    pub to_account: Uuid,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn new(from_account: Uuid, to_account: Uuid, amount: i64) -> Result<Self, DomainError> {
        if from_account == to_account {
            return Err(DomainError::SameAccount);
        }
        ensure_positive(amount)?;

        Ok(Self {
            id: Uuid::new_v4(),
            from_account,
            to_account,
            amount,
            created_at: Utc::now(),
        })
    }

    /// Both account ids in a stable order, for deadlock-free locking.
    pub fn lock_order(&self) -> [Uuid; 2] {
        if self.from_account < self.to_account {
            [self.from_account, self.to_account]
        } else {
            [self.to_account, self.from_account]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferResponse {
    pub id: Uuid,
    pub from_account: Uuid,
    pub to_account: Uuid,
    /// Amount in minor units
    #[schema(example = 2500)]
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            id: transfer.id,
            from_account: transfer.from_account,
            to_account: transfer.to_account,
            amount: transfer.amount,
            created_at: transfer.created_at,
        }
    }
}
