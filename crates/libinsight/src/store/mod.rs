//! Execution bridge to the embedded SQLite store.
//!
//! Every [`ExecutionBridge::execute`] call opens its own read-only connection and drops
//! it before returning, so no connection outlives a query.

pub mod load;
pub mod profile;

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde::Serialize;
use serde_json::{Value, json};

use crate::catalog::{SchemaCatalog, Table, quote_identifier};
use crate::guard::ValidatedQuery;
use crate::models::TabularResult;

pub use profile::{QueryProfile, analyze_query_profile};

pub const DEFAULT_ROW_CAP: usize = 1_000;
pub const DEFAULT_DB_FILE_NAME: &str = "CatDewey.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Open,
    Prepare,
    ReadOnlyViolation,
    Execute,
    Decode,
}

impl ExecutionStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Prepare => "prepare",
            Self::ReadOnlyViolation => "read_only_violation",
            Self::Execute => "execute",
            Self::Decode => "decode",
        }
    }
}

/// Store-level failure carrying the engine's own message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionError {
    pub stage: ExecutionStage,
    pub message: String,
}

impl ExecutionError {
    fn new(stage: ExecutionStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    fn from_sqlite(stage: ExecutionStage, error: &rusqlite::Error) -> Self {
        Self::new(stage, error.to_string())
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage.as_str(), self.message)
    }
}

impl std::error::Error for ExecutionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBridge {
    db_path: PathBuf,
    row_cap: usize,
}

impl ExecutionBridge {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>, row_cap: usize) -> Self {
        Self {
            db_path: db_path.into(),
            row_cap: row_cap.max(1),
        }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    pub fn execute(&self, query: &ValidatedQuery) -> Result<TabularResult, ExecutionError> {
        let connection = open_read_only_connection(&self.db_path)
            .map_err(|error| ExecutionError::from_sqlite(ExecutionStage::Open, &error))?;
        let result = run_read_only_query(&connection, query.as_str(), self.row_cap);
        drop(connection);

        match &result {
            Ok(table) => tracing::info!(
                rows = table.row_count(),
                truncated = table.truncated(),
                "query executed"
            ),
            Err(error) => tracing::warn!(stage = error.stage.as_str(), error = %error.message, "query failed"),
        }
        result
    }
}

fn open_read_only_connection(path: &Path) -> rusqlite::Result<Connection> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn run_read_only_query(
    connection: &Connection,
    sql: &str,
    row_cap: usize,
) -> Result<TabularResult, ExecutionError> {
    let mut statement = connection
        .prepare(sql)
        .map_err(|error| ExecutionError::from_sqlite(ExecutionStage::Prepare, &error))?;
    if !statement.readonly() {
        return Err(ExecutionError::new(
            ExecutionStage::ReadOnlyViolation,
            "statement would modify the database",
        ));
    }

    let column_names = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let column_count = column_names.len();

    let mut rows = statement
        .query(params_from_iter(std::iter::empty::<SqlValue>()))
        .map_err(|error| ExecutionError::from_sqlite(ExecutionStage::Execute, &error))?;
    let mut result_rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows
        .next()
        .map_err(|error| ExecutionError::from_sqlite(ExecutionStage::Execute, &error))?
    {
        if result_rows.len() >= row_cap {
            truncated = true;
            break;
        }

        let mut record = Vec::with_capacity(column_count);
        for index in 0..column_count {
            let value = row
                .get::<usize, SqlValue>(index)
                .map_err(|error| ExecutionError::from_sqlite(ExecutionStage::Decode, &error))?;
            record.push(json_value_from_sql(value));
        }
        result_rows.push(record);
    }

    Ok(TabularResult::new(column_names, result_rows, truncated))
}

fn json_value_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => json!(value),
        SqlValue::Real(value) => json!(value),
        SqlValue::Text(value) => json!(value),
        SqlValue::Blob(value) => json!(encode_blob_hex(&value)),
    }
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}

/// Writable connection for schema setup and ingestion; never used for generated SQL.
pub fn open_store_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create store parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite store: {}", path.display()))
}

pub fn initialize_schema(connection: &Connection, catalog: &SchemaCatalog) -> Result<()> {
    connection
        .execute_batch(&catalog.create_schema_sql())
        .context("failed to create store schema")
}

/// Replaces every row of `table` inside the caller's transaction.
pub fn replace_table_rows(
    connection: &Connection,
    table: &Table,
    rows: &[Vec<SqlValue>],
) -> Result<usize> {
    let table_name = quote_identifier(table.name);
    connection
        .execute(&format!("DELETE FROM {table_name}"), [])
        .with_context(|| format!("failed to clear table `{}`", table.name))?;

    let column_list = table
        .columns
        .iter()
        .map(|column| quote_identifier(column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=table.columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_sql = format!("INSERT INTO {table_name} ({column_list}) VALUES ({placeholders})");
    let mut statement = connection
        .prepare_cached(&insert_sql)
        .with_context(|| format!("failed to prepare insert for `{}`", table.name))?;

    for (index, row) in rows.iter().enumerate() {
        statement
            .execute(params_from_iter(row.iter()))
            .with_context(|| format!("failed to insert row {index} into `{}`", table.name))?;
    }

    Ok(rows.len())
}
