//! How an executed statement uses the library catalog, reported next to its rows.
//!
//! The checks mirror the conventions the SQL prompt asks for: `pop` is keyed by
//! (시도, 시군구), ratios divide after a `CAST(... AS FLOAT)`, and regional questions
//! group by region columns.

use serde::Serialize;
use serde_json::{Value, json};

use crate::catalog::{DISTRICT_COLUMN, POPULATION_TABLE, PROVINCE_COLUMN, SchemaCatalog};
use crate::guard::{code_text, strip_trailing_semicolons, words};

/// Tokens that end an `ON`/`WHERE` condition or a `GROUP BY` list.
const CLAUSE_BOUNDARIES: &[&str] = &[
    "select", "from", "join", "left", "right", "inner", "outer", "cross", "where", "group",
    "order", "having", "limit", "union", "on",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryProfile {
    /// Catalog tables the statement reads, in catalog order.
    pub tables: Vec<&'static str>,
    /// `pop` is read together with at least one library table.
    pub region_join: bool,
    /// Some join condition names both 시도 and 시군구.
    pub region_key_complete: bool,
    pub divides: bool,
    pub float_division: bool,
    pub grouped_by_region: bool,
    pub row_limit: Option<u64>,
}

impl QueryProfile {
    /// Departures from catalog conventions that commonly produce wrong numbers.
    #[must_use]
    pub fn hints(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        if self.region_join && !self.region_key_complete {
            hints.push("region_join_without_district");
        }
        if self.divides && !self.float_division {
            hints.push("integer_division");
        }
        hints
    }

    #[must_use]
    pub fn diagnostics(
        &self,
        duration_ms: u64,
        row_cap: usize,
        row_count: usize,
        truncated: bool,
    ) -> Value {
        json!({
            "tables": self.tables,
            "region_join": self.region_join,
            "region_key_complete": self.region_key_complete,
            "float_division": self.float_division,
            "grouped_by_region": self.grouped_by_region,
            "row_limit": self.row_limit,
            "hints": self.hints(),
            "duration_ms": duration_ms,
            "returned_rows": row_count,
            "row_cap": row_cap,
            "truncated": truncated,
        })
    }
}

#[must_use]
pub fn analyze_query_profile(raw_sql: &str) -> QueryProfile {
    let catalog = SchemaCatalog::library();
    let code = code_text(strip_trailing_semicolons(raw_sql)).to_lowercase();
    let tokens = words(&code).map(|(_, token)| token).collect::<Vec<_>>();

    let tables = catalog
        .table_names()
        .into_iter()
        .filter(|name| tokens.contains(name))
        .collect::<Vec<_>>();
    let region_join = tables.contains(&POPULATION_TABLE) && tables.len() > 1;

    let conditions = clauses(&tokens, |token| token == "on" || token == "where");
    let region_key_complete = conditions
        .iter()
        .any(|clause| clause.contains(&PROVINCE_COLUMN) && clause.contains(&DISTRICT_COLUMN));

    let grouped_by_region = tokens
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| matches!(pair, ["group", "by"]))
        .any(|(index, _)| {
            tokens[index + 2..]
                .iter()
                .take_while(|token| !CLAUSE_BOUNDARIES.contains(*token))
                .any(|token| *token == PROVINCE_COLUMN || *token == DISTRICT_COLUMN)
        });

    let float_division = tokens
        .windows(2)
        .any(|pair| matches!(pair, ["as", "float" | "real" | "double"]))
        || code.contains("1.0");
    let row_limit = tokens
        .iter()
        .rposition(|token| *token == "limit")
        .and_then(|index| tokens.get(index + 1))
        .and_then(|value| value.parse().ok());

    QueryProfile {
        tables,
        region_join,
        region_key_complete,
        divides: code.contains('/'),
        float_division,
        grouped_by_region,
        row_limit,
    }
}

/// Token runs that follow a token accepted by `opens`, up to the next clause boundary.
fn clauses<'a>(tokens: &[&'a str], opens: impl Fn(&str) -> bool) -> Vec<Vec<&'a str>> {
    let mut clauses = Vec::new();
    let mut current: Option<Vec<&'a str>> = None;
    for token in tokens {
        if CLAUSE_BOUNDARIES.contains(token) {
            clauses.extend(current.take());
            if opens(*token) {
                current = Some(Vec::new());
            }
        } else if let Some(clause) = current.as_mut() {
            clause.push(*token);
        }
    }
    clauses.extend(current);
    clauses
}

#[cfg(test)]
mod tests {
    use super::analyze_query_profile;

    #[test]
    fn composite_region_join_with_cast_ratio_has_no_hints() {
        let profile = analyze_query_profile(
            "SELECT b.시도, b.시군구, CAST(SUM(s.어린이서비스_이용수) AS FLOAT) / MAX(p.어린이인구) AS 이용률 \
             FROM base_info b JOIN pop p ON b.시도 = p.시도 AND b.시군구 = p.시군구 \
             JOIN service s ON b.도서관코드 = s.도서관코드 \
             GROUP BY b.시도, b.시군구 ORDER BY 이용률 ASC LIMIT 3;",
        );
        assert_eq!(profile.tables, ["base_info", "service", "pop"]);
        assert!(profile.region_join);
        assert!(profile.region_key_complete);
        assert!(profile.float_division);
        assert!(profile.grouped_by_region);
        assert_eq!(profile.row_limit, Some(3));
        assert!(profile.hints().is_empty());
    }

    #[test]
    fn province_only_join_and_integer_ratio_are_flagged() {
        let profile = analyze_query_profile(
            "SELECT b.시군구, SUM(h.총장서) / SUM(p.총인구) FROM base_info b \
             JOIN holding h ON b.도서관코드 = h.도서관코드 \
             JOIN pop p ON b.시도 = p.시도 GROUP BY b.시군구",
        );
        assert!(profile.region_join);
        assert!(!profile.region_key_complete);
        assert!(profile.grouped_by_region);
        assert_eq!(profile.row_limit, None);
        assert_eq!(
            profile.hints(),
            ["region_join_without_district", "integer_division"]
        );
    }

    #[test]
    fn names_in_literals_and_comments_are_not_tables() {
        let profile = analyze_query_profile(
            "SELECT 도서관명 FROM base_info WHERE 구분 = 'pop' -- join holding later",
        );
        assert_eq!(profile.tables, ["base_info"]);
        assert!(!profile.region_join);
        assert!(!profile.divides);
        assert!(!profile.grouped_by_region);
    }
}
