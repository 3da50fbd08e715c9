//! Natural-language question to SQL draft.
//!
//! [`QuerySynthesizer::synthesize`] never fails: oracle faults and unusable responses
//! are folded into a sentinel query (an SQL comment) whose explanation says what went
//! wrong.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{POPULATION_TABLE, SchemaCatalog};
use crate::oracle::{CompletionOracle, CompletionRequest, OracleError, ResponseFormat};
use crate::utils::fences::{extract_json_object, strip_code_fences};
use crate::utils::redaction::truncate_chars;

pub const SENTINEL_MALFORMED_SQL: &str = "-- SQL 생성 실패: AI가 올바른 형식을 반환하지 않음";
pub const SENTINEL_ERROR_SQL: &str = "-- Error";
pub const DEFAULT_EXPLANATION: &str = "자동 생성된 쿼리입니다.";
const SQL_FIELD_ALIASES: &[&str] = &["sql", "query", "SQL"];
const RAW_RESPONSE_MAX_CHARS: usize = 500;

/// Shape the oracle is asked to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SqlDraft {
    /// A single read-only SQLite SELECT statement ending with one `;`.
    pub sql: String,
    /// Short Korean explanation of what the query returns.
    pub explanation: String,
}

#[must_use]
pub fn draft_json_schema() -> Value {
    let schema = schemars::schema_for!(SqlDraft);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated draft schema: {error}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FewShotExample {
    pub question: &'static str,
    pub sql: &'static str,
    pub explanation: &'static str,
}

pub const FEW_SHOT_EXAMPLES: &[FewShotExample] = &[
    FewShotExample {
        question: "서울에 있는 도서관 이름 알려줘",
        sql: "SELECT 도서관명 FROM base_info WHERE 시도 = '서울특별시';",
        explanation: "서울특별시에 위치한 모든 도서관의 이름을 조회합니다.",
    },
    FewShotExample {
        question: "어린이 인구수 대비 어린이 서비스 이용수가 적은 지역(시군구) 3곳을 알려줘",
        sql: "SELECT b.시도, b.시군구, (CAST(SUM(s.어린이서비스_이용수) AS FLOAT) / MAX(p.어린이인구)) AS 이용률 FROM base_info b JOIN pop p ON b.시도 = p.시도 AND b.시군구 = p.시군구 JOIN service s ON b.도서관코드 = s.도서관코드 GROUP BY b.시도, b.시군구 ORDER BY 이용률 ASC LIMIT 3;",
        explanation: "지역별로 어린이 서비스 이용수 합계를 구한 뒤, 해당 지역의 어린이 인구수로 나누어 이용률이 가장 낮은 3곳을 추출합니다.",
    },
    FewShotExample {
        question: "장애인 관련 예산이 가장 많은 상위 5개 도서관과 그 지역을 알려줘",
        sql: "SELECT b.시도, b.도서관명, s.취약계층관련예산_장애인 FROM base_info b JOIN service s ON b.도서관코드 = s.도서관코드 ORDER BY s.취약계층관련예산_장애인 DESC LIMIT 5;",
        explanation: "서비스 테이블과 기본정보를 조인하여 장애인 예산이 가장 많은 순서대로 5개를 보여줍니다.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisFailureKind {
    GenerationMalformed,
    OracleUnavailable,
}

impl SynthesisFailureKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::GenerationMalformed => "generation_malformed",
            Self::OracleUnavailable => "oracle_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisFailure {
    pub kind: SynthesisFailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOrigin {
    Generated,
    /// The SQL was found under an alternate field name.
    Recovered { field: String },
    Failed(SynthesisFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesizedQuery {
    pub sql: String,
    pub explanation: String,
    pub origin: QueryOrigin,
}

impl SynthesizedQuery {
    #[must_use]
    pub fn failure(&self) -> Option<&SynthesisFailure> {
        match &self.origin {
            QueryOrigin::Failed(failure) => Some(failure),
            QueryOrigin::Generated | QueryOrigin::Recovered { .. } => None,
        }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.failure().is_some()
    }

    fn sentinel(sql: &str, explanation: String, kind: SynthesisFailureKind, detail: String) -> Self {
        Self {
            sql: sql.to_string(),
            explanation,
            origin: QueryOrigin::Failed(SynthesisFailure { kind, detail }),
        }
    }
}

pub struct QuerySynthesizer<'a> {
    oracle: &'a dyn CompletionOracle,
    catalog: &'a SchemaCatalog,
    strict_json_schema: bool,
}

impl<'a> QuerySynthesizer<'a> {
    #[must_use]
    pub fn new(oracle: &'a dyn CompletionOracle) -> Self {
        Self {
            oracle,
            catalog: SchemaCatalog::library(),
            strict_json_schema: false,
        }
    }

    #[must_use]
    pub fn with_strict_json_schema(mut self, enabled: bool) -> Self {
        self.strict_json_schema = enabled;
        self
    }

    #[must_use]
    pub fn build_request(&self, question: &str) -> CompletionRequest {
        let response_format = if self.strict_json_schema {
            ResponseFormat::JsonSchema {
                name: "sql_draft".to_string(),
                schema: draft_json_schema(),
            }
        } else {
            ResponseFormat::JsonObject
        };

        CompletionRequest::new(build_system_prompt(self.catalog), question)
            .with_temperature(0.0)
            .with_response_format(response_format)
    }

    pub fn synthesize(&self, question: &str) -> SynthesizedQuery {
        let request = self.build_request(question);
        let synthesized = match self.oracle.complete(&request) {
            Ok(raw) => parse_response(&raw),
            Err(error) => {
                let kind = match error {
                    OracleError::Unavailable(_) => SynthesisFailureKind::OracleUnavailable,
                    OracleError::Malformed(_) => SynthesisFailureKind::GenerationMalformed,
                };
                SynthesizedQuery::sentinel(
                    SENTINEL_ERROR_SQL,
                    format!("쿼리 생성 실패: {error}"),
                    kind,
                    error.to_string(),
                )
            }
        };

        match synthesized.failure() {
            Some(failure) => tracing::warn!(
                kind = failure.kind.code(),
                detail = %failure.detail,
                "query synthesis fell back to sentinel"
            ),
            None => tracing::info!(sql = %synthesized.sql, "query synthesized"),
        }
        synthesized
    }
}

/// System instructions: schema, rule set, and worked examples.
#[must_use]
pub fn build_system_prompt(catalog: &SchemaCatalog) -> String {
    let composite_join = catalog
        .join_condition(POPULATION_TABLE, "base_info")
        .unwrap_or_default();
    let library_tables = catalog
        .table_names()
        .into_iter()
        .filter(|name| *name != POPULATION_TABLE)
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ");

    let examples = FEW_SHOT_EXAMPLES
        .iter()
        .map(|example| {
            let answer = serde_json::json!({
                "sql": example.sql,
                "explanation": example.explanation,
            });
            format!("Q: \"{}\"\nA: {answer}", example.question)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "당신은 SQLite 전문가입니다. 아래 스키마를 보고 질문을 SQL로 변환하세요.

{schema}
[규칙]
1. 결과 형식: 반드시 JSON 포맷 {{\"sql\": \"SELECT ...\", \"explanation\": \"...\"}} 만 출력하세요.
2. 읽기 전용: SELECT 문만 사용 가능합니다. (INSERT, UPDATE, DELETE 금지)
3. 테이블 조인(JOIN) 필수:
   - `{pop}` 테이블과 다른 테이블들을 조인할 때는 반드시 복합키를 사용하세요.
   - 구문 예시: `ON {composite_join}`
   - {library_tables} 테이블끼리 join할 때는 `도서관코드`를 사용하세요.
4. 비율 계산:
   - 'A 대비 B' 또는 '비율'을 구할 때는 정수 나눗셈 오류를 방지하기 위해 `CAST`를 사용하세요.
   - 예: `CAST(SUM(B) AS FLOAT) / SUM(A)`
   - 비율 계산을 할 때 분모와 분자의 관계를 확실하게 이해하고 정확한 쿼리를 작성하세요.
   - 예: 'B 대비 A의 비율'은 CAST(SUM(A) AS FLOAT) / SUM(B)
5. 그룹화(GROUP BY):
   - 시도 단위 질문은 `base_info.시도`로, 시군구 단위 질문은 `base_info.시도`, `base_info.시군구`로 그룹화하세요.
   - 집계 함수(SUM, AVG)를 적절히 사용하여 도서관별 데이터를 지역별로 합치세요.
6. 제일 마지막에는 세미콜론(;)을 한 번만 붙이고, 두 번째 구문을 이어 붙이지 마세요.
7. INSERT, UPDATE, DELETE 등 데이터 변경 구문은 절대 사용하지 마세요. (읽기 전용)
8. 존재하지 않는 테이블이나 컬럼 이름을 지어내지 말고, 위에 정의된 스키마만 사용하세요. 스키마에 정의된 테이블명과 컬럼명을 글자 하나도 빼지 말고 그대로 사용하세요.
9. SELECT나 WHERE 절에 사용된 컬럼이 있는 테이블은 반드시 FROM이나 JOIN 절에 포함되어야 합니다.

[답변 예시]

{examples}
",
        schema = catalog.render_prompt_text(),
        pop = POPULATION_TABLE,
    )
}

/// Parses the oracle's raw text into a query, or a sentinel when no SQL can be found.
#[must_use]
pub fn parse_response(raw: &str) -> SynthesizedQuery {
    let Some(object) = parse_object(raw) else {
        return SynthesizedQuery::sentinel(
            SENTINEL_MALFORMED_SQL,
            format!(
                "AI 응답 오류: {}",
                truncate_chars(raw, RAW_RESPONSE_MAX_CHARS)
            ),
            SynthesisFailureKind::GenerationMalformed,
            "response is not a JSON object".to_string(),
        );
    };

    let explanation = object
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string);

    match find_sql_field(&object) {
        Some((field, sql)) => {
            let origin = if field == "sql" {
                QueryOrigin::Generated
            } else {
                QueryOrigin::Recovered { field }
            };
            SynthesizedQuery {
                sql,
                explanation: explanation.unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
                origin,
            }
        }
        None => SynthesizedQuery::sentinel(
            SENTINEL_MALFORMED_SQL,
            explanation.unwrap_or_else(|| {
                format!(
                    "AI 응답 오류: {}",
                    truncate_chars(raw, RAW_RESPONSE_MAX_CHARS)
                )
            }),
            SynthesisFailureKind::GenerationMalformed,
            "response has no usable sql field".to_string(),
        ),
    }
}

fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    let stripped = strip_code_fences(raw);
    let parsed = serde_json::from_str::<Value>(&stripped)
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            extract_json_object(&stripped).and_then(|block| serde_json::from_str(block).ok())
        })?;

    match parsed {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn find_sql_field(object: &Map<String, Value>) -> Option<(String, String)> {
    let usable = |value: &Value| {
        value
            .as_str()
            .map(repair_sql)
            .filter(|sql| !sql.is_empty())
    };

    for alias in SQL_FIELD_ALIASES {
        if let Some(sql) = object.get(*alias).and_then(usable) {
            return Some(((*alias).to_string(), sql));
        }
    }

    object.iter().find_map(|(key, value)| {
        let lowered = key.to_ascii_lowercase();
        (lowered == "sql" || lowered == "query")
            .then(|| usable(value))
            .flatten()
            .map(|sql| (key.clone(), sql))
    })
}

/// Normalises a drafted statement: no fences, no surrounding whitespace, exactly one
/// trailing terminator. Empty input stays empty.
#[must_use]
pub fn repair_sql(sql: &str) -> String {
    let stripped = strip_code_fences(sql);
    let mut candidate = stripped.trim();
    while let Some(rest) = candidate.strip_suffix(';') {
        candidate = rest.trim_end();
    }
    if candidate.is_empty() {
        return String::new();
    }
    format!("{candidate};")
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_EXPLANATION, QueryOrigin, SENTINEL_MALFORMED_SQL, SynthesisFailureKind,
        build_system_prompt, draft_json_schema, parse_response, repair_sql,
    };
    use crate::catalog::SchemaCatalog;

    #[test]
    fn parses_well_formed_draft() {
        let parsed = parse_response(
            r#"{"sql": "SELECT 도서관명 FROM base_info;", "explanation": "모든 도서관"}"#,
        );
        assert_eq!(parsed.sql, "SELECT 도서관명 FROM base_info;");
        assert_eq!(parsed.explanation, "모든 도서관");
        assert_eq!(parsed.origin, QueryOrigin::Generated);
    }

    #[test]
    fn recovers_alternate_field_names_and_default_explanation() {
        let parsed = parse_response(r#"{"query": "SELECT 1"}"#);
        assert_eq!(parsed.sql, "SELECT 1;");
        assert_eq!(parsed.explanation, DEFAULT_EXPLANATION);
        assert_eq!(
            parsed.origin,
            QueryOrigin::Recovered {
                field: "query".to_string()
            }
        );

        let upper = parse_response(r#"{"SQL": "SELECT 2;;"}"#);
        assert_eq!(upper.sql, "SELECT 2;");

        let mixed = parse_response(r#"{"Sql": "SELECT 3"}"#);
        assert_eq!(mixed.sql, "SELECT 3;");
    }

    #[test]
    fn fenced_and_prose_wrapped_json_is_recovered() {
        let fenced = parse_response("```json\n{\"sql\": \"SELECT 1;\", \"explanation\": \"x\"}\n```");
        assert_eq!(fenced.sql, "SELECT 1;");

        let prose = parse_response("물론입니다! {\"sql\": \"SELECT 4\", \"explanation\": \"y\"} 끝.");
        assert_eq!(prose.sql, "SELECT 4;");
    }

    #[test]
    fn missing_sql_yields_sentinel_with_raw_text() {
        let parsed = parse_response(r#"{"answer": "없음"}"#);
        assert_eq!(parsed.sql, SENTINEL_MALFORMED_SQL);
        assert!(parsed.explanation.starts_with("AI 응답 오류:"));
        assert_eq!(
            parsed.failure().map(|failure| failure.kind),
            Some(SynthesisFailureKind::GenerationMalformed)
        );

        let empty = parse_response(r#"{"sql": "  ", "explanation": "빈 쿼리"}"#);
        assert!(empty.is_sentinel());
        assert_eq!(empty.explanation, "빈 쿼리");

        let not_json = parse_response("I cannot help with that.");
        assert!(not_json.is_sentinel());
    }

    #[test]
    fn repair_collapses_terminators() {
        assert_eq!(repair_sql("```sql\nSELECT 1 ;; \n```"), "SELECT 1;");
        assert_eq!(repair_sql(";"), "");
    }

    #[test]
    fn system_prompt_embeds_schema_rules_and_examples() {
        let prompt = build_system_prompt(SchemaCatalog::library());
        assert!(prompt.contains("[데이터베이스 스키마]"));
        assert!(prompt.contains("ON pop.시도 = base_info.시도 AND pop.시군구 = base_info.시군구"));
        assert!(prompt.contains("CAST(SUM(B) AS FLOAT) / SUM(A)"));
        assert!(prompt.contains("Q: \"서울에 있는 도서관 이름 알려줘\""));
        assert!(prompt.contains("`base_info`, `holding`, `fac`, `user`, `service`"));
    }

    #[test]
    fn draft_schema_requires_both_fields() {
        let schema = draft_json_schema();
        let required = schema["required"]
            .as_array()
            .expect("required list should exist");
        assert!(required.iter().any(|field| field == "sql"));
        assert!(required.iter().any(|field| field == "explanation"));
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
    }
}
