//! Database connection and initialization.
//!
//! The pool and the session core only depend on the [`Connection`] /
//! [`Connector`] seam. [`Database`] wires that seam to PostgreSQL and owns the
//! embedded schema migrations.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::migrate::{Migrate, Migrator};
use sqlx::Connection as _;

use crate::config::Config;

pub mod connection;
pub mod error;
pub mod pool;
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use connection::{
    Connection, Connector, ExecResult, IsolationLevel, Row, SqlType, SqlTyped, Statement,
    TransactionOptions, Value,
};
pub use error::{DbError, DbResult};
pub use pool::{ConnectionProvider, PoolOptions, PoolStatus, PooledConnection};
pub use postgres::PgConnector;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// One embedded migration and whether it has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub applied: bool,
}

/// Process-scoped database resource: the connection pool plus migrations.
#[derive(Clone)]
pub struct Database {
    provider: ConnectionProvider,
    connector: Arc<PgConnector>,
}

impl Database {
    /// Connect, apply pending migrations when configured, and warm the pool.
    pub async fn connect(config: &Config) -> DbResult<Self> {
        Self::open(config, config.database_run_migrations).await
    }

    /// Connect without touching the schema (for CLI commands).
    pub async fn connect_without_migrations(config: &Config) -> DbResult<Self> {
        Self::open(config, false).await
    }

    async fn open(config: &Config, migrate: bool) -> DbResult<Self> {
        let connector = Arc::new(PgConnector::from_url(&config.database_url)?);

        if migrate {
            apply_migrations(&connector).await?;
        }

        let provider = ConnectionProvider::connect(connector.clone(), config.pool_options()).await?;
        tracing::info!("Database connected");

        Ok(Self {
            provider,
            connector,
        })
    }

    /// Get a handle to the connection pool.
    pub fn provider(&self) -> ConnectionProvider {
        self.provider.clone()
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        apply_migrations(&self.connector).await
    }

    /// Revert the most recently applied migration.
    ///
    /// Returns the reverted version, or `None` when nothing was applied.
    pub async fn rollback_migration(&self) -> DbResult<Option<i64>> {
        let mut conn = self.connector.open().await?;
        conn.ensure_migrations_table().await?;

        let applied: Vec<i64> = conn
            .list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();

        let Some(latest) = applied.iter().copied().max() else {
            conn.close().await?;
            return Ok(None);
        };
        let target = applied
            .iter()
            .copied()
            .filter(|v| *v < latest)
            .max()
            .unwrap_or(0);

        MIGRATOR.undo(&mut conn, target).await?;
        conn.close().await?;

        tracing::info!(version = latest, "Migration reverted");
        Ok(Some(latest))
    }

    /// List all embedded migrations with their applied status.
    pub async fn migration_status(&self) -> DbResult<Vec<MigrationInfo>> {
        let mut conn = self.connector.open().await?;
        conn.ensure_migrations_table().await?;

        let applied: HashSet<i64> = conn
            .list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();
        conn.close().await?;

        Ok(MIGRATOR
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .map(|m| MigrationInfo {
                version: m.version,
                description: m.description.to_string(),
                applied: applied.contains(&m.version),
            })
            .collect())
    }

    /// Check database connectivity through the pool.
    pub async fn ping(&self) -> DbResult<()> {
        self.provider.ping().await
    }

    pub async fn close(&self) {
        self.provider.close().await;
    }
}

async fn apply_migrations(connector: &PgConnector) -> DbResult<()> {
    let mut conn = connector.open().await?;
    MIGRATOR.run(&mut conn).await?;
    conn.close().await?;
    tracing::info!("Migrations applied");
    Ok(())
}
