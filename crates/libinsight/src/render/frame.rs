//! Read-only data frame view handed to visualization scripts as `df`.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use rhai::{Array, Dynamic, EvalAltResult, FLOAT, INT};
use serde_json::Value;

use crate::models::TabularResult;

static NULL_CELL: Value = Value::Null;

/// A row selection over a shared [`TabularResult`].
///
/// Script operations such as `head` or `sort_values` build a new selection; the
/// underlying rows are never copied or modified.
#[derive(Debug, Clone)]
pub struct DataFrame {
    source: Arc<TabularResult>,
    rows: Arc<[usize]>,
}

impl DataFrame {
    #[must_use]
    pub fn new(source: Arc<TabularResult>) -> Self {
        let rows = (0..source.row_count()).collect::<Vec<_>>().into();
        Self { source, rows }
    }

    fn select(&self, rows: Vec<usize>) -> Self {
        Self {
            source: Arc::clone(&self.source),
            rows: rows.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.source.columns()
    }

    fn column_position(&self, name: &str) -> Result<usize, Box<EvalAltResult>> {
        self.source.column_index(name).ok_or_else(|| {
            format!(
                "unknown column `{name}`; available columns: {}",
                self.source.columns().join(", ")
            )
            .into()
        })
    }

    fn cell(&self, row: usize, column: usize) -> &Value {
        self.source.rows()[row].get(column).unwrap_or(&NULL_CELL)
    }

    /// Values of one column in the current row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<Value>, Box<EvalAltResult>> {
        let column = self.column_position(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| self.cell(*row, column).clone())
            .collect())
    }

    pub fn column(&self, name: &str) -> Result<Array, Box<EvalAltResult>> {
        Ok(self
            .column_values(name)?
            .iter()
            .map(dynamic_from_json)
            .collect())
    }

    #[must_use]
    pub fn columns(&self) -> Array {
        self.source
            .columns()
            .iter()
            .map(|column| Dynamic::from(column.clone()))
            .collect()
    }

    #[must_use]
    pub fn head(&self, count: usize) -> Self {
        self.select(self.rows.iter().copied().take(count).collect())
    }

    /// Keeps the first occurrence of every distinct row.
    #[must_use]
    pub fn drop_duplicates(&self) -> Self {
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .copied()
            .filter(|row| seen.insert(row_key(&self.source.rows()[*row])))
            .collect();
        self.select(rows)
    }

    /// Stable sort; nulls always go last.
    pub fn sort_values(&self, name: &str, ascending: bool) -> Result<Self, Box<EvalAltResult>> {
        let column = self.column_position(name)?;
        let mut rows = self.rows.to_vec();
        rows.sort_by(|left, right| {
            let left = self.cell(*left, column);
            let right = self.cell(*right, column);
            match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ordering = compare_values(left, right);
                    if ascending { ordering } else { ordering.reverse() }
                }
            }
        });
        Ok(self.select(rows))
    }
}

fn row_key(row: &[Value]) -> String {
    serde_json::to_string(row).unwrap_or_default()
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => display_key(left).cmp(&display_key(right)),
    }
}

fn display_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[must_use]
pub fn dynamic_from_json(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(flag) => Dynamic::from_bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Dynamic::from_int(integer as INT),
            None => Dynamic::from_float(number.as_f64().unwrap_or(f64::NAN) as FLOAT),
        },
        Value::String(text) => Dynamic::from(text.clone()),
        other => Dynamic::from(other.to_string()),
    }
}
