//! HTTP request handlers.

pub mod account_handler;
pub mod transfer_handler;

pub use account_handler::account_routes;
pub use transfer_handler::transfer_routes;
