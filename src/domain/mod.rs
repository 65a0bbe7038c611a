//! Domain layer - Core business entities and logic
//!
//! Plain data and invariants for the ledger. No I/O happens here.

pub mod account;
mod error;
pub mod transfer;

pub use account::{Account, AccountResponse, LedgerSummary};
pub use error::DomainError;
pub use transfer::{Transfer, TransferResponse};
