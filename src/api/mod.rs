//! API layer - HTTP handlers and routes
//!
//! Each handler is the boundary of one unit of work: it begins the session,
//! lends it to a service, and lets the factory commit or roll back before
//! mapping the outcome to a response.

pub mod extractors;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
