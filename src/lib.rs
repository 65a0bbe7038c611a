//! Ledger Service - accounts and transfers over PostgreSQL
//!
//! Every HTTP request that touches the database runs inside exactly one
//! unit of work: a pooled connection, one transaction, and a [`Session`]
//! that repositories borrow. The request scope decides whether the
//! transaction commits or rolls back; nothing below it does.
//!
//! # Architecture Layers
//!
//! - **cli**: Command-line interface
//! - **commands**: CLI command implementations
//! - **config**: Application configuration and constants
//! - **domain**: Core business entities and logic
//! - **services**: Application use cases and business logic
//! - **infra**: Connection pool, sessions, unit of work, repositories
//! - **api**: HTTP handlers and routes
//! - **types**: Shared types (pagination)
//! - **errors**: Centralized error handling
//!
//! # CLI Usage
//!
//! ```bash
//! # Start the server
//! cargo run -- serve
//!
//! # Run migrations
//! cargo run -- migrate up
//!
//! # Print ledger totals
//! cargo run -- report
//! ```
//!
//! [`Session`]: infra::Session

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod infra;
pub mod services;
pub mod types;

// Re-export commonly used types at crate root
pub use api::AppState;
pub use config::Config;
pub use domain::{Account, Transfer};
pub use errors::{AppError, AppResult};
pub use infra::{Session, UnitOfWorkFactory};
