//! Database-layer error taxonomy.
//!
//! Everything below the service layer reports failures through [`DbError`].
//! The HTTP mapping lives in `crate::errors`.

use thiserror::Error;
use uuid::Uuid;

use crate::infra::session::SessionState;

/// SQLSTATE raised by PostgreSQL when a serializable transaction cannot commit.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised when the transaction was chosen as a deadlock victim.
const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// No connection became available within the acquisition timeout.
    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    /// An operation was issued on a session that is no longer open.
    #[error("Session {session_id} is {state}, no further operations allowed")]
    SessionClosed {
        session_id: Uuid,
        state: SessionState,
    },

    /// The transaction was invalidated by a detected conflict.
    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("No rows returned")]
    RowNotFound,

    /// Transport-level failure; the connection must not be reused.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {message}")]
    Query {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Failed to decode row: {0}")]
    Decode(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DbError {
    pub fn connection(message: impl Into<String>) -> Self {
        DbError::Connection(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        DbError::Query {
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn stale(reason: impl Into<String>) -> Self {
        DbError::StaleState(reason.into())
    }

    /// Whether the physical connection should be discarded after this error.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                        DbError::StaleState(db_err.message().to_string())
                    }
                    Some(UNIQUE_VIOLATION) => DbError::UniqueViolation(
                        db_err
                            .constraint()
                            .map(str::to_string)
                            .unwrap_or_else(|| db_err.message().to_string()),
                    ),
                    _ => DbError::Query {
                        message: db_err.message().to_string(),
                        sql_state: code,
                    },
                }
            }
            sqlx::Error::RowNotFound => DbError::RowNotFound,
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted { waited_ms: 0 },
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(e) => DbError::Connection(format!("I/O error: {}", e)),
            sqlx::Error::Tls(e) => DbError::Connection(format!("TLS error: {}", e)),
            sqlx::Error::Protocol(msg) => DbError::Connection(format!("Protocol error: {}", msg)),
            sqlx::Error::Configuration(e) => {
                DbError::Connection(format!("Invalid connection options: {}", e))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Decode(format!("column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::Decode(source.to_string()),
            other => DbError::query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Decode(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
