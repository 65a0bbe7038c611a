//! Repository layer - Data access abstraction
//!
//! Repositories are stateless: every operation borrows the caller's
//! [`Session`](crate::infra::Session) and runs inside its transaction. They
//! never begin, commit or roll back.

mod account_repository;
mod transfer_repository;

pub use account_repository::{AccountRepository, AccountStore};
pub use transfer_repository::{TransferRepository, TransferStore};

// Export mocks for tests (both unit and integration)
#[cfg(any(test, feature = "test-utils"))]
pub use account_repository::MockAccountRepository;
#[cfg(any(test, feature = "test-utils"))]
pub use transfer_repository::MockTransferRepository;
