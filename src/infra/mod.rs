//! Infrastructure layer - External systems integration
//!
//! - Database connections, the connection pool and migrations
//! - Sessions and the Unit of Work that scopes them
//! - Repositories

pub mod db;
pub mod repositories;
pub mod session;
pub mod unit_of_work;

pub use db::{
    ConnectionProvider, Database, DbError, DbResult, IsolationLevel, PoolOptions, PoolStatus,
    Statement, TransactionOptions,
};
pub use repositories::{AccountRepository, AccountStore, TransferRepository, TransferStore};
pub use session::{Session, SessionState};
pub use unit_of_work::UnitOfWorkFactory;

#[cfg(any(test, feature = "test-utils"))]
pub use repositories::{MockAccountRepository, MockTransferRepository};
