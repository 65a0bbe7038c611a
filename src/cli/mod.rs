//! CLI module - Command-line interface for the application.
//!
//! Provides commands for:
//! - `serve` - Start the HTTP server
//! - `migrate` - Database migrations
//! - `report` - Ledger totals

pub mod args;

pub use args::{Cli, Commands};
