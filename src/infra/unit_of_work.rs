//! Unit of Work - scoped transactional sessions.
//!
//! [`UnitOfWorkFactory`] hands out [`Session`]s and runs closures inside them.
//! The scoped `transaction*` methods guarantee that a session is finalized
//! exactly once and its connection released, whatever way the closure exits:
//!
//! - `Ok` commits, then releases
//! - `Err` rolls back, then releases
//! - cancellation or panic drops the session, which rolls back before the
//!   connection is reused
//!
//! Repositories and services only ever borrow the session; they never begin,
//! commit or roll back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::Instrument;

use super::db::{ConnectionProvider, DbError, DbResult, IsolationLevel, TransactionOptions};
use super::session::Session;

#[derive(Clone)]
pub struct UnitOfWorkFactory {
    provider: ConnectionProvider,
    defaults: TransactionOptions,
    active: Arc<AtomicUsize>,
}

impl UnitOfWorkFactory {
    /// Create a factory using `READ COMMITTED` read-write transactions.
    pub fn new(provider: ConnectionProvider) -> Self {
        Self::with_defaults(provider, TransactionOptions::default())
    }

    pub fn with_defaults(provider: ConnectionProvider, defaults: TransactionOptions) -> Self {
        Self {
            provider,
            defaults,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    pub fn defaults(&self) -> TransactionOptions {
        self.defaults
    }

    /// Sessions created by this factory that are not closed yet.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Begin a session with the default options.
    ///
    /// The caller owns the session and must commit or roll back, then
    /// [`Session::close`] it. Prefer [`UnitOfWorkFactory::transaction`].
    pub async fn begin(&self) -> DbResult<Session> {
        self.begin_with(self.defaults).await
    }

    pub async fn begin_with(&self, options: TransactionOptions) -> DbResult<Session> {
        let mut conn = self.provider.acquire().await?;

        if let Err(e) = conn.begin(options).await {
            tracing::warn!(error = %e, "Failed to open transaction");
            conn.release().await;
            return Err(e);
        }

        Ok(Session::new(conn, options, self.active.clone()))
    }

    /// Execute a closure within a transaction using the default options.
    ///
    /// Committed on `Ok`, rolled back on `Err`. A commit failure (including
    /// [`DbError::StaleState`]) is converted into `E` and returned.
    pub async fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Send,
    {
        self.transaction_with(self.defaults, f).await
    }

    /// Execute a closure within a serializable transaction.
    ///
    /// Use this for operations requiring the strongest consistency guarantees.
    pub async fn transaction_serializable<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Send,
    {
        let options = TransactionOptions {
            isolation: IsolationLevel::Serializable,
            ..self.defaults
        };
        self.transaction_with(options, f).await
    }

    /// Execute a closure within a read-only transaction.
    pub async fn transaction_read_only<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Send,
    {
        self.transaction_with(self.defaults.read_only(), f).await
    }

    pub async fn transaction_with<F, T, E>(&self, options: TransactionOptions, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Send,
    {
        let mut session = self.begin_with(options).await?;

        let span = tracing::info_span!(
            "unit_of_work",
            session_id = %session.id(),
            isolation = %options.isolation,
            read_only = options.read_only,
        );

        async move {
            match f(&mut session).await {
                Ok(value) => {
                    let committed = session.commit().await;
                    session.close().await;
                    committed?;
                    Ok(value)
                }
                Err(e) => {
                    session.rollback().await;
                    session.close().await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Simpler API for executing transactional operations.
///
/// ```ignore
/// let account = with_transaction!(state.uow, |session| {
///     service.deposit(session, id, amount).await
/// })?;
///
/// let history = with_transaction!(state.uow, transaction_read_only, |session| {
///     service.history(session, id).await
/// })?;
/// ```
#[macro_export]
macro_rules! with_transaction {
    ($uow:expr, |$session:ident| $body:expr) => {
        $uow.transaction(move |$session| Box::pin(async move { $body }))
            .await
    };
    ($uow:expr, $method:ident, |$session:ident| $body:expr) => {
        $uow.$method(move |$session| Box::pin(async move { $body }))
            .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::db::testing::{settle, Command, ScriptedConnector};
    use crate::infra::db::{PoolOptions, Statement};

    fn factory(connector: &ScriptedConnector) -> UnitOfWorkFactory {
        UnitOfWorkFactory::new(connector.provider(PoolOptions::new(2)))
    }

    #[tokio::test]
    async fn test_transaction_variants_apply_options() {
        let connector = ScriptedConnector::new();
        let uow = factory(&connector);

        uow.transaction(|_| Box::pin(async { Ok::<_, DbError>(()) }))
            .await
            .unwrap();
        uow.transaction_serializable(|_| Box::pin(async { Ok::<_, DbError>(()) }))
            .await
            .unwrap();
        uow.transaction_read_only(|_| Box::pin(async { Ok::<_, DbError>(()) }))
            .await
            .unwrap();

        let begins: Vec<_> = connector
            .log()
            .into_iter()
            .filter_map(|e| match e.command {
                Command::Begin(options) => Some(options),
                _ => None,
            })
            .collect();

        assert_eq!(
            begins,
            vec![
                TransactionOptions::default(),
                TransactionOptions::serializable(),
                TransactionOptions::default().read_only(),
            ]
        );
        assert_eq!(connector.commits(), 3);
    }

    #[tokio::test]
    async fn test_begin_failure_releases_connection() {
        let connector = ScriptedConnector::new();
        let uow = factory(&connector);
        connector.fail_connect(DbError::connection("refused"));

        let result = uow.begin().await;

        assert!(matches!(result, Err(DbError::Connection(_))));
        assert_eq!(uow.provider().status().in_use, 0);
        assert_eq!(uow.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_manual_session_lifecycle() {
        let connector = ScriptedConnector::new();
        let uow = factory(&connector);

        let mut session = uow.begin().await.unwrap();
        assert_eq!(uow.active_sessions(), 1);
        session
            .execute(Statement::new("DELETE FROM transfers"))
            .await
            .unwrap();
        session.commit().await.unwrap();
        session.close().await;

        assert_eq!(uow.active_sessions(), 0);
        let status = settle(uow.provider()).await;
        assert_eq!(status.in_use, 0);
        assert_eq!(status.idle, 1);
    }

    #[tokio::test]
    async fn test_macro_forms() {
        let connector = ScriptedConnector::new();
        let uow = factory(&connector);

        let n: Result<u64, DbError> = crate::with_transaction!(uow, |session| {
            let result = session.execute(Statement::new("UPDATE t SET a = 1")).await?;
            Ok::<_, DbError>(result.rows_affected)
        });
        assert_eq!(n.unwrap(), 1);

        let rows: Result<usize, DbError> =
            crate::with_transaction!(uow, transaction_read_only, |session| {
                let rows = session.fetch_all(Statement::new("SELECT 1")).await?;
                Ok::<_, DbError>(rows.len())
            });
        assert_eq!(rows.unwrap(), 0);
        assert_eq!(connector.commits(), 2);
    }
}
