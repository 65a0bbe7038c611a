//! Session - one transactional scope over one borrowed connection.
//!
//! A session moves `open -> committed | rolled_back -> closed` exactly once.
//! Once it has left `open`, every statement fails with
//! [`DbError::SessionClosed`].
//!
//! Sessions are owned by the scope that began them and lent to services and
//! repositories as `&mut Session`. Dropping a session that is still open (for
//! example because its request was cancelled) marks it closed and sends the
//! connection through the pool's rollback-before-reuse path.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::db::{
    DbError, DbResult, ExecResult, PooledConnection, Row, Statement, TransactionOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Keeps the factory's live-session gauge accurate on every exit path.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn new(gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(gauge)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    options: TransactionOptions,
    conn: Option<PooledConnection>,
    statements: u64,
    pending_writes: u64,
    invalidated: Option<String>,
    _active: ActiveSession,
}

impl Session {
    /// Wrap a connection whose transaction has already been opened.
    pub(crate) fn new(
        conn: PooledConnection,
        options: TransactionOptions,
        gauge: Arc<AtomicUsize>,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, isolation = %options.isolation, read_only = options.read_only, "Session opened");

        Self {
            id,
            state: SessionState::Open,
            options,
            conn: Some(conn),
            statements: 0,
            pending_writes: 0,
            invalidated: None,
            _active: ActiveSession::new(gauge),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    /// Statements issued so far, successful or not.
    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Successful `execute` calls not yet committed.
    pub fn pending_writes(&self) -> u64 {
        self.pending_writes
    }

    pub fn invalidation(&self) -> Option<&str> {
        self.invalidated.as_deref()
    }

    /// Mark the transaction as unable to commit.
    ///
    /// The first reason wins; [`Session::commit`] will report it as
    /// [`DbError::StaleState`].
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        if self.invalidated.is_none() {
            let reason = reason.into();
            tracing::debug!(session_id = %self.id, %reason, "Session invalidated");
            self.invalidated = Some(reason);
        }
    }

    fn closed_error(&self) -> DbError {
        DbError::SessionClosed {
            session_id: self.id,
            state: self.state,
        }
    }

    fn connection(&mut self) -> DbResult<&mut PooledConnection> {
        if self.state != SessionState::Open {
            return Err(self.closed_error());
        }
        let closed = self.closed_error();
        self.conn.as_mut().ok_or(closed)
    }

    /// Record the outcome of a statement. A failed statement aborts the
    /// surrounding transaction.
    fn track<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.statements += 1;
        if let Err(e) = &result {
            self.invalidate(e.to_string());
        }
        result
    }

    /// Run a statement that does not return rows.
    pub async fn execute(&mut self, statement: Statement) -> DbResult<ExecResult> {
        let conn = self.connection()?;
        let result = conn.execute(&statement).await;
        let result = self.track(result);
        if result.is_ok() {
            self.pending_writes += 1;
        }
        result
    }

    pub async fn fetch_all(&mut self, statement: Statement) -> DbResult<Vec<Row>> {
        let conn = self.connection()?;
        let result = conn.fetch_all(&statement).await;
        self.track(result)
    }

    pub async fn fetch_optional(&mut self, statement: Statement) -> DbResult<Option<Row>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// Fetch exactly one row; no rows is [`DbError::RowNotFound`].
    pub async fn fetch_one(&mut self, statement: Statement) -> DbResult<Row> {
        self.fetch_optional(statement)
            .await?
            .ok_or(DbError::RowNotFound)
    }

    /// Commit the transaction.
    ///
    /// An invalidated session is rolled back instead and reports
    /// [`DbError::StaleState`]. On any failure the session ends
    /// `rolled_back` and the error is returned.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.state != SessionState::Open {
            return Err(self.closed_error());
        }

        if let Some(reason) = self.invalidated.clone() {
            tracing::warn!(session_id = %self.id, %reason, "Refusing to commit invalidated session");
            self.rollback().await;
            return Err(DbError::StaleState(reason));
        }

        let result = self.connection()?.commit().await;
        match result {
            Ok(()) => {
                self.state = SessionState::Committed;
                tracing::debug!(
                    session_id = %self.id,
                    statements = self.statements,
                    writes = self.pending_writes,
                    "Session committed"
                );
                self.pending_writes = 0;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::RolledBack;
                tracing::warn!(session_id = %self.id, error = %e, "Commit failed, transaction rolled back");
                Err(e)
            }
        }
    }

    /// Roll back the transaction.
    ///
    /// Never fails: a broken connection is logged and left for the pool to
    /// discard. No-op once rolled back or closed; ignored after commit.
    pub async fn rollback(&mut self) {
        match self.state {
            SessionState::Open => {}
            SessionState::Committed => {
                tracing::warn!(session_id = %self.id, "Rollback ignored, session already committed");
                return;
            }
            SessionState::RolledBack | SessionState::Closed => return,
        }

        self.state = SessionState::RolledBack;
        self.pending_writes = 0;

        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.rollback().await {
                tracing::warn!(session_id = %self.id, error = %e, "Rollback failed, connection will be discarded");
                return;
            }
        }
        tracing::debug!(session_id = %self.id, "Session rolled back");
    }

    /// Finalize (rolling back if still open) and return the connection.
    pub async fn close(mut self) {
        if self.state == SessionState::Open {
            self.rollback().await;
        }
        self.state = SessionState::Closed;

        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("options", &self.options)
            .field("statements", &self.statements)
            .field("pending_writes", &self.pending_writes)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            tracing::warn!(
                session_id = %self.id,
                statements = self.statements,
                "Session dropped while open, transaction will be rolled back"
            );
        }
        self.state = SessionState::Closed;
        // The connection's own drop rolls back and returns it.
    }
}
