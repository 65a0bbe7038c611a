//! Application state shared by every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::infra::{Database, UnitOfWorkFactory};
use crate::services::{AccountService, ServiceContainer, Services, TransferService};

/// Handlers begin their unit of work through `uow` and hand the session to
/// the services.
#[derive(Clone)]
pub struct AppState {
    pub uow: UnitOfWorkFactory,
    pub account_service: Arc<dyn AccountService>,
    pub transfer_service: Arc<dyn TransferService>,
    /// Requests running longer than this are cancelled
    pub request_timeout: Duration,
}

impl AppState {
    /// Wire the SQL-backed services to a connected database.
    pub fn from_config(database: &Database, config: &Config) -> Self {
        let uow = UnitOfWorkFactory::with_defaults(database.provider(), config.transaction_options());
        Self::from_container(uow, &Services::with_stores())
            .with_request_timeout(config.request_timeout())
    }

    pub fn from_container(uow: UnitOfWorkFactory, services: &dyn ServiceContainer) -> Self {
        Self::new(uow, services.accounts(), services.transfers())
    }

    pub fn new(
        uow: UnitOfWorkFactory,
        account_service: Arc<dyn AccountService>,
        transfer_service: Arc<dyn TransferService>,
    ) -> Self {
        Self {
            uow,
            account_service,
            transfer_service,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
