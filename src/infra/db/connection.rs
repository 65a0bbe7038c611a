//! Physical connection seam.
//!
//! The session and pool only ever talk to a [`Connection`] produced by a
//! [`Connector`]. PostgreSQL is one implementation; tests substitute an
//! in-memory double with the same begin/commit/rollback contract.
//!
//! Every method is a suspension point. Implementations must never block the
//! calling thread.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::error::{DbError, DbResult};

/// One physical database connection.
#[async_trait]
pub trait Connection: Send {
    /// Open a transaction with the given options.
    async fn begin(&mut self, options: TransactionOptions) -> DbResult<()>;

    /// Run a statement that does not return rows.
    async fn execute(&mut self, statement: &Statement) -> DbResult<ExecResult>;

    /// Run a statement and collect every returned row.
    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Cheap liveness check.
    async fn ping(&mut self) -> DbResult<()>;

    /// Gracefully terminate the physical connection.
    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Opens physical connections on behalf of the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> DbResult<Box<dyn Connection>>;
}

// =============================================================================
// Transaction options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!("unknown isolation level: {}", other)),
        }
    }
}

/// Options applied when a session opens its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: false,
        }
    }

    pub fn serializable() -> Self {
        Self::new(IsolationLevel::Serializable)
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// The `BEGIN` statement that opens a transaction with these options.
    pub fn begin_sql(&self) -> String {
        let access = if self.read_only {
            "READ ONLY"
        } else {
            "READ WRITE"
        };
        format!("BEGIN ISOLATION LEVEL {} {}", self.isolation.as_sql(), access)
    }
}

// =============================================================================
// Statements and values
// =============================================================================

/// Declared type of a NULL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    Json,
}

/// Rust types that bind as a single SQL type.
pub trait SqlTyped {
    const SQL_TYPE: SqlType;
}

macro_rules! sql_typed {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl SqlTyped for $ty {
            const SQL_TYPE: SqlType = SqlType::$kind;
        })*
    };
}

sql_typed! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    JsonValue => Json,
}

/// A bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(SqlType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value> + SqlTyped> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null(T::SQL_TYPE))
    }
}

/// SQL text plus positional (`$1`, `$2`, ...) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    values: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
}

/// A result row, column name to JSON-compatible value.
///
/// Rows deserialize straight into domain structs via serde.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Map<String, JsonValue>);

impl Row {
    /// Read and deserialize one column.
    pub fn get<T: DeserializeOwned>(&self, column: &str) -> DbResult<T> {
        let value = self
            .0
            .get(column)
            .ok_or_else(|| DbError::Decode(format!("missing column '{}'", column)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| DbError::Decode(format!("column '{}': {}", column, e)))
    }

    /// Deserialize the whole row.
    pub fn decode<T: DeserializeOwned>(self) -> DbResult<T> {
        Ok(serde_json::from_value(JsonValue::Object(self.0))?)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<Map<String, JsonValue>> for Row {
    fn from(map: Map<String, JsonValue>) -> Self {
        Row(map)
    }
}

impl From<JsonValue> for Row {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Row(map),
            other => {
                let mut map = Map::new();
                map.insert("?column?".to_string(), other);
                Row(map)
            }
        }
    }
}
