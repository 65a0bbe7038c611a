//! Scripted in-memory connection double.
//!
//! Lets pool, session and service tests run without a database: replies are
//! queued up front, every command is logged, and commit/rollback/connect
//! failures can be injected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::connection::{Connection, Connector, ExecResult, Row, Statement, TransactionOptions};
use super::error::{DbError, DbResult};
use super::pool::{ConnectionProvider, PoolOptions, PoolStatus};

/// A command observed by the double.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Begin(TransactionOptions),
    Execute(String),
    Query(String),
    Commit,
    Rollback,
    Ping,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedCommand {
    /// 1-based id of the physical connection that saw the command
    pub connection: usize,
    pub command: Command,
}

enum Reply {
    Rows(Vec<Row>),
    Exec(u64),
    Fail(DbError),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    log: Vec<LoggedCommand>,
    connections_opened: usize,
    commit_failure: Option<DbError>,
    rollback_failure: Option<DbError>,
    connect_failure: Option<DbError>,
    latency: Option<Duration>,
    rollback_latency: Option<Duration>,
}

/// Connector whose connections replay a shared script.
///
/// Statements consume queued replies in order. With the queue empty,
/// `execute` reports one affected row and `fetch_all` returns no rows.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A lazily-connecting pool over this connector.
    pub fn provider(&self, options: PoolOptions) -> ConnectionProvider {
        ConnectionProvider::new(Arc::new(self.clone()), options)
    }

    /// Queue a result set; each JSON object becomes one row.
    pub fn push_rows<I>(&self, rows: I) -> &Self
    where
        I: IntoIterator<Item = JsonValue>,
    {
        let rows = rows.into_iter().map(Row::from).collect();
        self.script().replies.push_back(Reply::Rows(rows));
        self
    }

    pub fn push_row(&self, row: JsonValue) -> &Self {
        self.push_rows([row])
    }

    /// Queue an empty result set.
    pub fn push_empty(&self) -> &Self {
        self.push_rows([])
    }

    pub fn push_exec(&self, rows_affected: u64) -> &Self {
        self.script().replies.push_back(Reply::Exec(rows_affected));
        self
    }

    pub fn push_error(&self, err: DbError) -> &Self {
        self.script().replies.push_back(Reply::Fail(err));
        self
    }

    /// The next `COMMIT` fails with `err`.
    pub fn fail_next_commit(&self, err: DbError) {
        self.script().commit_failure = Some(err);
    }

    /// Every `ROLLBACK` fails with `err` from now on.
    pub fn fail_rollbacks(&self, err: DbError) {
        self.script().rollback_failure = Some(err);
    }

    pub fn fail_connect(&self, err: DbError) {
        self.script().connect_failure = Some(err);
    }

    /// Delay applied to every statement before it replies.
    pub fn set_latency(&self, latency: Duration) {
        self.script().latency = Some(latency);
    }

    /// Delay applied to every `ROLLBACK`, after it is logged.
    pub fn set_rollback_latency(&self, latency: Duration) {
        self.script().rollback_latency = Some(latency);
    }

    pub fn log(&self) -> Vec<LoggedCommand> {
        self.script().log.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.script()
            .log
            .iter()
            .filter(|entry| predicate(&entry.command))
            .count()
    }

    pub fn begins(&self) -> usize {
        self.count(|c| matches!(c, Command::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|c| matches!(c, Command::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|c| matches!(c, Command::Rollback))
    }

    pub fn connections_opened(&self) -> usize {
        self.script().connections_opened
    }

    /// SQL text of every statement issued, in order.
    pub fn statements(&self) -> Vec<String> {
        self.script()
            .log
            .iter()
            .filter_map(|entry| match &entry.command {
                Command::Execute(sql) | Command::Query(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        let mut script = self.script();
        if let Some(err) = script.connect_failure.clone() {
            return Err(err);
        }
        script.connections_opened += 1;
        Ok(Box::new(ScriptedConnection {
            id: script.connections_opened,
            script: self.script.clone(),
        }))
    }
}

struct ScriptedConnection {
    id: usize,
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnection {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log a command and return the configured latency.
    fn record(&self, command: Command) -> Option<Duration> {
        let mut script = self.script();
        script.log.push(LoggedCommand {
            connection: self.id,
            command,
        });
        script.latency
    }

    async fn reply(&self, command: Command) -> Option<Reply> {
        if let Some(latency) = self.record(command) {
            tokio::time::sleep(latency).await;
        }
        self.script().replies.pop_front()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn begin(&mut self, options: TransactionOptions) -> DbResult<()> {
        self.record(Command::Begin(options));
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<ExecResult> {
        match self.reply(Command::Execute(statement.sql().to_string())).await {
            Some(Reply::Exec(rows_affected)) => Ok(ExecResult { rows_affected }),
            Some(Reply::Rows(rows)) => Ok(ExecResult {
                rows_affected: rows.len() as u64,
            }),
            Some(Reply::Fail(err)) => Err(err),
            None => Ok(ExecResult { rows_affected: 1 }),
        }
    }

    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        match self.reply(Command::Query(statement.sql().to_string())).await {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Exec(_)) | None => Ok(Vec::new()),
            Some(Reply::Fail(err)) => Err(err),
        }
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record(Command::Commit);
        match self.script().commit_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record(Command::Rollback);
        let latency = self.script().rollback_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.script().rollback_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.record(Command::Ping);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.record(Command::Close);
        Ok(())
    }
}

/// Wait until every permit is back, letting spawned resets finish.
///
/// Gives up after two seconds and returns whatever the pool reports.
pub async fn settle(provider: &ConnectionProvider) -> PoolStatus {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let status = provider.status();
        if status.in_use == 0 || Instant::now() >= deadline {
            return status;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
