//! Service Container - Centralized service access.

use std::sync::Arc;

use super::{AccountManager, AccountService, TransferManager, TransferService};
use crate::infra::{AccountRepository, AccountStore, TransferRepository, TransferStore};

/// Service container trait for dependency injection.
pub trait ServiceContainer: Send + Sync {
    fn accounts(&self) -> Arc<dyn AccountService>;

    fn transfers(&self) -> Arc<dyn TransferService>;
}

/// Concrete implementation of ServiceContainer
#[derive(Clone)]
pub struct Services {
    account_service: Arc<dyn AccountService>,
    transfer_service: Arc<dyn TransferService>,
}

impl Services {
    pub fn new(
        account_service: Arc<dyn AccountService>,
        transfer_service: Arc<dyn TransferService>,
    ) -> Self {
        Self {
            account_service,
            transfer_service,
        }
    }

    /// Wire every service to the given repositories.
    pub fn from_repositories(
        accounts: Arc<dyn AccountRepository>,
        transfers: Arc<dyn TransferRepository>,
    ) -> Self {
        Self::new(
            Arc::new(AccountManager::new(accounts.clone())),
            Arc::new(TransferManager::new(accounts, transfers)),
        )
    }

    /// Wire every service to the SQL-backed stores.
    pub fn with_stores() -> Self {
        Self::from_repositories(Arc::new(AccountStore::new()), Arc::new(TransferStore::new()))
    }
}

impl ServiceContainer for Services {
    fn accounts(&self) -> Arc<dyn AccountService> {
        self.account_service.clone()
    }

    fn transfers(&self) -> Arc<dyn TransferService> {
        self.transfer_service.clone()
    }
}
