//! Application services layer - Use cases and business logic.
//!
//! Services compose repository calls into business operations. Every
//! operation borrows the caller's session; a service never acquires, commits
//! or rolls back one, and returns failures unchanged so the request boundary
//! can decide.

mod account_service;
pub mod container;
mod transfer_service;

// Service Container
pub use container::{ServiceContainer, Services};

// Service traits and implementations
pub use account_service::{AccountManager, AccountService};
pub use transfer_service::{TransferManager, TransferService};
