use serde::Serialize;
use serde_json::{Map, Value};

/// Rows and columns returned by one executed query.
///
/// Fields are private: once built, a result is only ever read. Downstream stages share
/// it through `Arc<TabularResult>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    truncated: bool,
}

impl TabularResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        Self {
            columns,
            rows,
            truncated,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(index)))
    }

    /// Rows as JSON objects keyed by column name, in column order.
    #[must_use]
    pub fn records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let record = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>();
                Value::Object(record)
            })
            .collect()
    }

    /// Pipe table of the first `limit` rows, used as the data sample in prompts.
    #[must_use]
    pub fn to_markdown(&self, limit: usize) -> String {
        let mut lines = Vec::with_capacity(limit.min(self.rows.len()) + 2);
        let header = std::iter::once(String::new())
            .chain(self.columns.iter().map(|column| escape_cell(column)))
            .collect::<Vec<_>>();
        lines.push(format!("| {} |", header.join(" | ")));
        lines.push(format!("|{}|", vec!["---"; header.len()].join("|")));

        for (index, row) in self.rows.iter().take(limit).enumerate() {
            let cells = std::iter::once(index.to_string())
                .chain(row.iter().map(|value| escape_cell(&display_value(value))))
                .collect::<Vec<_>>();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        lines.join("\n")
    }
}

#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::TabularResult;

    fn sample() -> TabularResult {
        TabularResult::new(
            vec!["도서관명".to_string(), "총장서".to_string()],
            vec![
                vec![json!("강남도서관"), json!(120_000)],
                vec![json!("마포|분관"), json!(null)],
                vec![json!("강남도서관"), json!(120_000)],
            ],
            false,
        )
    }

    #[test]
    fn markdown_sample_is_limited_and_escaped() {
        let markdown = sample().to_markdown(2);
        let lines = markdown.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "|  | 도서관명 | 총장서 |");
        assert_eq!(lines[1], "|---|---|---|");
        assert_eq!(lines[2], "| 0 | 강남도서관 | 120000 |");
        assert_eq!(lines[3], "| 1 | 마포\\|분관 |  |");
    }

    #[test]
    fn records_and_column_lookup_follow_column_order() {
        let table = sample();
        assert_eq!(
            table.records()[0],
            json!({"도서관명": "강남도서관", "총장서": 120000})
        );
        let names = table
            .column_values("도서관명")
            .expect("column should exist")
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 3);
        assert!(table.column_values("missing").is_none());
    }
}
