//! PostgreSQL implementation of the connection seam, on top of sqlx.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column, Connection as _, Decode, Executor, Postgres, Row as _, Type, TypeInfo};

use super::connection::{
    Connection, Connector, ExecResult, Row, SqlType, Statement, TransactionOptions, Value,
};
use super::error::{DbError, DbResult};

const APPLICATION_NAME: &str = "ledger-service";

/// Opens PostgreSQL connections from a `postgres://` URL.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn from_url(url: &str) -> DbResult<Self> {
        let options = PgConnectOptions::from_str(url)?.application_name(APPLICATION_NAME);
        Ok(Self { options })
    }

    /// Open a raw sqlx connection, outside the pool.
    pub async fn open(&self) -> DbResult<PgConnection> {
        Ok(PgConnection::connect_with(&self.options).await?)
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        let conn = self.open().await?;
        Ok(Box::new(PgBackend { conn }))
    }
}

struct PgBackend {
    conn: PgConnection,
}

#[async_trait]
impl Connection for PgBackend {
    async fn begin(&mut self, options: TransactionOptions) -> DbResult<()> {
        let sql = options.begin_sql();
        Executor::execute(&mut self.conn, sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<ExecResult> {
        let result = bind_values(sqlx::query(statement.sql()), statement.values())
            .execute(&mut self.conn)
            .await?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
        })
    }

    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        let rows = bind_values(sqlx::query(statement.sql()), statement.values())
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn commit(&mut self) -> DbResult<()> {
        Executor::execute(&mut self.conn, sqlx::raw_sql("COMMIT")).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        Executor::execute(&mut self.conn, sqlx::raw_sql("ROLLBACK")).await?;
        Ok(())
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            Value::Null(kind) => bind_null(query, *kind),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Uuid(v) => query.bind(*v),
            Value::Timestamp(v) => query.bind(*v),
            Value::Json(v) => query.bind(Json(v)),
        };
    }
    query
}

/// A NULL parameter still needs a declared type, or PostgreSQL rejects it
/// for non-text columns.
fn bind_null<'q>(
    query: Query<'q, Postgres, PgArguments>,
    kind: SqlType,
) -> Query<'q, Postgres, PgArguments> {
    match kind {
        SqlType::Bool => query.bind(None::<bool>),
        SqlType::Int => query.bind(None::<i64>),
        SqlType::Float => query.bind(None::<f64>),
        SqlType::Text => query.bind(None::<String>),
        SqlType::Uuid => query.bind(None::<uuid::Uuid>),
        SqlType::Timestamp => query.bind(None::<chrono::DateTime<chrono::Utc>>),
        SqlType::Json => query.bind(None::<Json<JsonValue>>),
    }
}

fn row_to_json(row: &PgRow) -> DbResult<Row> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.name(), column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(Row::from(map))
}

/// How a PostgreSQL column type is read into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
}

fn column_kind(type_name: &str) -> Option<ColumnKind> {
    let kind = match type_name {
        "BOOL" => ColumnKind::Bool,
        "INT2" => ColumnKind::Int2,
        "INT4" => ColumnKind::Int4,
        "INT8" => ColumnKind::Int8,
        "FLOAT4" => ColumnKind::Float4,
        "FLOAT8" => ColumnKind::Float8,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => ColumnKind::Text,
        "UUID" => ColumnKind::Uuid,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "JSON" | "JSONB" => ColumnKind::Json,
        _ => return None,
    };
    Some(kind)
}

fn decode_column(row: &PgRow, idx: usize, name: &str, type_name: &str) -> DbResult<JsonValue> {
    let kind = column_kind(type_name).ok_or_else(|| {
        DbError::Decode(format!("column {name}: unsupported type {type_name}"))
    })?;

    match kind {
        ColumnKind::Bool => column::<bool>(row, idx, name),
        ColumnKind::Int2 => column::<i16>(row, idx, name),
        ColumnKind::Int4 => column::<i32>(row, idx, name),
        ColumnKind::Int8 => column::<i64>(row, idx, name),
        ColumnKind::Float4 => column::<f32>(row, idx, name),
        ColumnKind::Float8 => column::<f64>(row, idx, name),
        ColumnKind::Text => column::<String>(row, idx, name),
        ColumnKind::Uuid => column::<uuid::Uuid>(row, idx, name),
        ColumnKind::TimestampTz => column::<chrono::DateTime<chrono::Utc>>(row, idx, name),
        ColumnKind::Timestamp => column::<chrono::NaiveDateTime>(row, idx, name),
        ColumnKind::Date => column::<chrono::NaiveDate>(row, idx, name),
        ColumnKind::Json => column::<JsonValue>(row, idx, name),
    }
}

fn column<'r, T>(row: &'r PgRow, idx: usize, name: &str) -> DbResult<JsonValue>
where
    T: Decode<'r, Postgres> + Type<Postgres> + Serialize,
{
    let value = row
        .try_get::<Option<T>, _>(idx)
        .map_err(|e| DbError::Decode(format!("column {name}: {e}")))?;

    match value {
        Some(v) => serde_json::to_value(v)
            .map_err(|e| DbError::Decode(format!("column {name}: {e}"))),
        None => Ok(JsonValue::Null),
    }
}
