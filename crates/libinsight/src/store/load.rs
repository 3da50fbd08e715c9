//! One-shot CSV ingestion that builds the store from the six source extracts.
//!
//! All six files must be present before anything is written, and the whole load commits
//! in a single transaction.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use encoding_rs::EUC_KR;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;

use super::{initialize_schema, open_store_connection, replace_table_rows};
use crate::catalog::{ColumnType, SchemaCatalog, Table};

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoadStats {
    pub table: &'static str,
    pub source_path: String,
    pub rows_written: usize,
    pub ignored_columns: Vec<String>,
    pub missing_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub db_path: String,
    pub tables: Vec<TableLoadStats>,
}

impl LoadReport {
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|table| table.rows_written).sum()
    }
}

pub fn load_csv_directory(
    source_dir: &Path,
    db_path: &Path,
    catalog: &SchemaCatalog,
) -> Result<LoadReport> {
    let sources = catalog
        .tables()
        .iter()
        .map(|table| (table, source_dir.join(table.source_file)))
        .collect::<Vec<_>>();

    let missing = sources
        .iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(_, path)| path.display().to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!("missing source CSV files: {}", missing.join(", "));
    }

    let mut connection = open_store_connection(db_path)?;
    initialize_schema(&connection, catalog)?;
    let transaction = connection
        .transaction()
        .context("failed to start load transaction")?;

    let mut tables = Vec::with_capacity(sources.len());
    for (table, path) in &sources {
        let parsed = read_table_csv(table, path)?;
        let rows_written = replace_table_rows(&transaction, table, &parsed.rows)?;
        tracing::info!(table = table.name, rows = rows_written, "loaded table");
        tables.push(TableLoadStats {
            table: table.name,
            source_path: path.display().to_string(),
            rows_written,
            ignored_columns: parsed.ignored_columns,
            missing_columns: parsed.missing_columns,
        });
    }

    transaction
        .commit()
        .context("failed to commit load transaction")?;

    Ok(LoadReport {
        db_path: db_path.display().to_string(),
        tables,
    })
}

#[derive(Debug)]
struct ParsedTable {
    rows: Vec<Vec<SqlValue>>,
    ignored_columns: Vec<String>,
    missing_columns: Vec<String>,
}

fn read_table_csv(table: &Table, path: &Path) -> Result<ParsedTable> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to open {}", path.display()))?;
    let text = decode_source(&bytes);
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header row of {}", path.display()))?
        .iter()
        .map(|field| field.trim_start_matches(UTF8_BOM).trim().to_string())
        .collect::<Vec<_>>();

    let header_positions = headers
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect::<HashMap<_, _>>();
    let column_sources = table
        .columns
        .iter()
        .map(|column| header_positions.get(column.name).copied())
        .collect::<Vec<_>>();
    let ignored_columns = headers
        .iter()
        .filter(|name| !name.is_empty() && !table.has_column(name))
        .cloned()
        .collect::<Vec<_>>();
    let missing_columns = table
        .columns
        .iter()
        .zip(&column_sources)
        .filter(|(_, source)| source.is_none())
        .map(|(column, _)| column.name.to_string())
        .collect::<Vec<_>>();
    if missing_columns.len() == table.columns.len() {
        bail!(
            "`{}` source {} matches none of its catalog columns (found: {})",
            table.name,
            path.display(),
            headers.join(", ")
        );
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("failed to read record {} of {}", line + 1, path.display())
        })?;
        let row = table
            .columns
            .iter()
            .zip(&column_sources)
            .map(|(column, source)| {
                let raw = source
                    .and_then(|index| record.get(index))
                    .unwrap_or_default();
                typed_cell(column.declared_type, raw)
            })
            .collect::<Vec<_>>();
        rows.push(row);
    }

    Ok(ParsedTable {
        rows,
        ignored_columns,
        missing_columns,
    })
}

/// Public extracts ship as UTF-8 or as CP949; anything that is not valid UTF-8 is read as CP949.
fn decode_source(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _, had_errors) = EUC_KR.decode(bytes);
            if had_errors {
                tracing::warn!("source is neither UTF-8 nor CP949; undecodable bytes replaced");
            }
            text
        }
    }
}

/// Empty cells become NULL. Numeric cells that do not parse keep their text.
fn typed_cell(declared_type: ColumnType, raw: &str) -> SqlValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SqlValue::Null;
    }

    let numeric = trimmed.replace(',', "");
    match declared_type {
        ColumnType::Text => SqlValue::Text(trimmed.to_string()),
        ColumnType::Integer => {
            if let Ok(value) = numeric.parse::<i64>() {
                SqlValue::Integer(value)
            } else if let Ok(value) = numeric.parse::<f64>() {
                SqlValue::Real(value)
            } else {
                SqlValue::Text(trimmed.to_string())
            }
        }
        ColumnType::Float => numeric
            .parse::<f64>()
            .map(SqlValue::Real)
            .unwrap_or_else(|_| SqlValue::Text(trimmed.to_string())),
    }
}
