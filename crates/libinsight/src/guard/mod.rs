//! Lexical read-only checkpoint for generated SQL.
//!
//! This is not a parser and not an injection defense; it only guarantees that text
//! carrying a mutation keyword, more than one statement, or no SELECT never reaches
//! the store. The store additionally opens connections read-only.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Value, json};

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "replace", "truncate", "attach",
    "detach", "pragma", "vacuum", "reindex", "analyze", "begin", "commit", "rollback",
    "savepoint", "release", "grant", "revoke", "merge", "upsert",
];

const ALLOWED_FORMS: &[&str] = &[
    "SELECT ...",
    "WITH ... SELECT ...",
    "EXPLAIN SELECT ...",
    "EXPLAIN QUERY PLAN SELECT ...",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    EmptyStatement,
    MultiStatement,
    MutatingStatement,
    MissingSelect,
    UnsupportedStatement,
}

impl RejectionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyStatement => "empty_statement",
            Self::MultiStatement => "multi_statement",
            Self::MutatingStatement => "mutating_statement",
            Self::MissingSelect => "missing_select",
            Self::UnsupportedStatement => "unsupported_statement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRejection {
    pub reason: RejectionReason,
    pub message: String,
    pub offending_sql: String,
    pub detected_keyword: Option<String>,
}

impl GuardRejection {
    #[must_use]
    pub fn details(&self) -> Value {
        let mut violation = json!({ "reason": self.reason.as_str() });
        if let Some(keyword) = &self.detected_keyword {
            violation["detected_keyword"] = json!(keyword);
        }
        json!({
            "allowed_forms": ALLOWED_FORMS,
            "guardrail": "read_only_sql_single_statement",
            "offending_sql": self.offending_sql,
            "violation": violation,
        })
    }
}

impl Display for GuardRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GuardRejection {}

/// SQL text that passed the guard. Only [`QueryGuard::validate`] can build one, so the
/// execution bridge cannot be handed unchecked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
}

impl ValidatedQuery {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.sql
    }
}

impl Display for ValidatedQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryGuard;

impl QueryGuard {
    pub fn validate(&self, raw_sql: &str) -> Result<ValidatedQuery, GuardRejection> {
        let reject = |reason: RejectionReason, message: String, keyword: Option<String>| {
            GuardRejection {
                reason,
                message,
                offending_sql: raw_sql.to_string(),
                detected_keyword: keyword,
            }
        };

        let candidate = strip_trailing_semicolons(raw_sql);
        if candidate.is_empty() {
            return Err(reject(
                RejectionReason::EmptyStatement,
                "SQL query is empty; provide a single SELECT statement".to_string(),
                None,
            ));
        }

        let code = code_text(candidate).to_lowercase();
        if code.contains(';') {
            return Err(reject(
                RejectionReason::MultiStatement,
                "Multi-statement SQL is not allowed; submit exactly one read-only statement"
                    .to_string(),
                None,
            ));
        }

        if let Some(keyword) = first_mutating_keyword(&code) {
            return Err(reject(
                RejectionReason::MutatingStatement,
                format!("Mutating SQL keyword `{keyword}` is not allowed"),
                Some(keyword),
            ));
        }

        if !words(&code).any(|(_, token)| token == "select") {
            return Err(reject(
                RejectionReason::MissingSelect,
                "SQL must be a SELECT query".to_string(),
                None,
            ));
        }

        let leading = words(&code).map(|(_, token)| token).collect::<Vec<_>>();
        let allowed = match leading.as_slice() {
            ["select", ..] | ["with", ..] => true,
            ["explain", "select", ..] | ["explain", "query", "plan", "select", ..] => true,
            _ => false,
        };
        if !allowed {
            let leading_keyword = leading.first().copied().unwrap_or("unknown");
            return Err(reject(
                RejectionReason::UnsupportedStatement,
                format!(
                    "Only SELECT, WITH ... SELECT, and EXPLAIN ... SELECT statements are allowed (found `{leading_keyword}`)"
                ),
                None,
            ));
        }

        Ok(ValidatedQuery {
            sql: raw_sql.trim().to_string(),
        })
    }
}

pub(crate) fn strip_trailing_semicolons(raw_sql: &str) -> &str {
    let mut candidate = raw_sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Word tokens with their byte offsets.
pub(crate) fn words(code: &str) -> impl Iterator<Item = (usize, &str)> {
    let is_word = |ch: char| ch.is_alphanumeric() || ch == '_';
    let mut rest = code.char_indices().peekable();
    std::iter::from_fn(move || {
        while rest.next_if(|&(_, ch)| !is_word(ch)).is_some() {}
        let (start, _) = *rest.peek()?;
        let mut end = start;
        while let Some((offset, ch)) = rest.next_if(|&(_, ch)| is_word(ch)) {
            end = offset + ch.len_utf8();
        }
        Some((start, &code[start..end]))
    })
}

/// A keyword directly followed by `(` is a function call such as `replace(...)`.
fn first_mutating_keyword(code: &str) -> Option<String> {
    words(code).find_map(|(start, token)| {
        let is_call = code[start + token.len()..].trim_start().starts_with('(');
        (MUTATING_KEYWORDS.contains(&token) && !is_call).then(|| token.to_string())
    })
}

/// Blanks string literals, quoted identifiers and comments so that only code reaches
/// the terminator and keyword checks.
pub(crate) fn code_text(sql: &str) -> String {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut code = String::with_capacity(sql.len());
    let mut mode = Mode::Code;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match mode {
            Mode::Code => match ch {
                '\'' | '"' | '`' => mode = Mode::Quoted(ch),
                '[' => mode = Mode::Quoted(']'),
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    mode = Mode::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    mode = Mode::BlockComment;
                }
                _ => {
                    code.push(ch);
                    continue;
                }
            },
            Mode::Quoted(close) => {
                if ch == close {
                    // doubled quote is an escaped quote
                    if close != ']' && chars.peek() == Some(&close) {
                        chars.next();
                    } else {
                        mode = Mode::Code;
                    }
                }
            }
            Mode::LineComment => {
                if ch == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    mode = Mode::Code;
                }
            }
        }
        code.push(' ');
    }
    code
}

#[cfg(test)]
mod tests {
    use super::{QueryGuard, RejectionReason};

    #[test]
    fn trailing_terminators_are_optional() {
        assert!(QueryGuard.validate("SELECT 1").is_ok());
        assert!(QueryGuard.validate("select 1 ; ").is_ok());
    }

    #[test]
    fn cte_and_query_plan_forms_are_read_only() {
        assert!(
            QueryGuard
                .validate("WITH x AS (SELECT 1) SELECT * FROM x;")
                .is_ok(),
            "WITH ... SELECT should be allowed"
        );
        assert!(
            QueryGuard
                .validate("EXPLAIN QUERY PLAN SELECT * FROM base_info")
                .is_ok(),
            "EXPLAIN QUERY PLAN SELECT should be allowed"
        );
    }

    #[test]
    fn empty_chained_and_insert_statements_are_refused() {
        let empty = QueryGuard.validate("  ;  ").expect_err("empty SQL must be rejected");
        assert_eq!(empty.reason, RejectionReason::EmptyStatement);

        let multi = QueryGuard
            .validate("SELECT 1; SELECT 2;")
            .expect_err("multi-statement SQL must be rejected");
        assert_eq!(multi.reason, RejectionReason::MultiStatement);
        assert_eq!(
            multi
                .details()
                .pointer("/violation/reason")
                .and_then(|v| v.as_str()),
            Some("multi_statement")
        );

        let mutating = QueryGuard
            .validate("INSERT INTO base_info SELECT * FROM base_info")
            .expect_err("mutating SQL must be rejected");
        assert_eq!(mutating.reason, RejectionReason::MutatingStatement);
        assert_eq!(mutating.detected_keyword.as_deref(), Some("insert"));
        assert_eq!(
            mutating
                .details()
                .pointer("/violation/detected_keyword")
                .and_then(|v| v.as_str()),
            Some("insert")
        );
    }

    #[test]
    fn rejects_sentinel_comment_without_select() {
        let rejection = QueryGuard
            .validate("-- Error")
            .expect_err("comment-only text must be rejected");
        assert_eq!(rejection.reason, RejectionReason::MissingSelect);
        assert_eq!(rejection.offending_sql, "-- Error");
    }

    #[test]
    fn semicolons_inside_literals_and_comments_are_not_terminators() {
        assert!(
            QueryGuard
                .validate("SELECT 도서관명 FROM base_info WHERE 도서관명 = 'a;b';")
                .is_ok()
        );
        assert!(
            QueryGuard
                .validate("SELECT 1 /* one; two */ -- trailing; note\n;")
                .is_ok()
        );
        assert!(
            QueryGuard
                .validate("SELECT 'it''s; fine' AS x;")
                .is_ok()
        );
    }

    #[test]
    fn rejects_explain_of_mutation_and_unsupported_leading_keyword() {
        let explain = QueryGuard
            .validate("EXPLAIN DELETE FROM base_info")
            .expect_err("EXPLAIN DELETE should still be rejected");
        assert_eq!(explain.detected_keyword.as_deref(), Some("delete"));

        let values = QueryGuard
            .validate("VALUES (1) UNION SELECT 2")
            .expect_err("leading VALUES should be rejected");
        assert_eq!(values.reason, RejectionReason::UnsupportedStatement);
    }

    #[test]
    fn identifiers_containing_keywords_are_not_mutations() {
        assert!(
            QueryGuard
                .validate("SELECT updated_at, created_by FROM user;")
                .is_ok()
        );
    }

    #[test]
    fn keyword_text_in_calls_literals_and_comments_is_not_a_mutation() {
        for sql in [
            "SELECT REPLACE(도서관명, '도서관', '') AS 이름 FROM base_info;",
            "SELECT replace (도서관명, ' ', '') FROM base_info",
            "SELECT 도서관명 FROM base_info WHERE 구분 = 'update';",
            "SELECT \"delete\" FROM base_info",
            "SELECT 1 -- drop the header row\n",
            "/* insert later */ SELECT 1",
        ] {
            assert!(QueryGuard.validate(sql).is_ok(), "{sql} should pass");
        }

        let rejection = QueryGuard
            .validate("REPLACE INTO base_info SELECT * FROM base_info")
            .expect_err("REPLACE INTO is still a mutation");
        assert_eq!(rejection.detected_keyword.as_deref(), Some("replace"));
    }

    #[test]
    fn select_inside_a_literal_does_not_count() {
        let rejection = QueryGuard
            .validate("VALUES ('select')")
            .expect_err("a quoted select is not a query");
        assert_eq!(rejection.reason, RejectionReason::MissingSelect);
    }
}
