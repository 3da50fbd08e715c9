//! Visualization script and narrative report generated from one tabular result.
//!
//! The two oracle calls are independent and run on scoped threads. Each is contained on
//! its own: a failed call yields a placeholder artifact instead of an error.

use std::thread;

use serde::Serialize;

use crate::models::TabularResult;
use crate::oracle::{CompletionOracle, CompletionRequest, OracleError};
use crate::utils::fences::strip_code_fences;

pub const VISUALIZATION_FAILURE_PREFIX: &str = "// 시각화 코드 생성 실패: ";
pub const REPORT_FAILURE_TEXT: &str = "리포트 생성에 실패했습니다.";
pub const VISUALIZATION_SAMPLE_ROWS: usize = 5;
pub const REPORT_SAMPLE_ROWS: usize = 10;
const VISUALIZATION_USER_PROMPT: &str = "시각화 코드를 작성해줘.";
const REPORT_SYSTEM_PROMPT: &str = "데이터 분석가로서 결과를 요약하고 인사이트를 제공하세요.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub viz_code: String,
    pub report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viz_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_failure: Option<String>,
}

impl Artifacts {
    /// True when `viz_code` is a generated script rather than the failure marker.
    #[must_use]
    pub fn has_visualization(&self) -> bool {
        self.viz_failure.is_none() && !self.viz_code.trim().is_empty()
    }
}

pub struct ArtifactSynthesizer<'a> {
    oracle: &'a dyn CompletionOracle,
}

impl<'a> ArtifactSynthesizer<'a> {
    #[must_use]
    pub fn new(oracle: &'a dyn CompletionOracle) -> Self {
        Self { oracle }
    }

    pub fn synthesize_artifacts(&self, table: &TabularResult, question: &str) -> Artifacts {
        let viz_request = build_visualization_request(table, question);
        let report_request = build_report_request(table, question);

        let (viz, report) = thread::scope(|scope| {
            let viz = scope.spawn(|| self.oracle.complete(&viz_request));
            let report = scope.spawn(|| self.oracle.complete(&report_request));
            (join_contained(viz), join_contained(report))
        });

        let (viz_code, viz_failure) = match viz {
            Ok(raw) => (strip_code_fences(&raw), None),
            Err(error) => {
                tracing::warn!(error = %error, "visualization code generation failed");
                (
                    format!("{VISUALIZATION_FAILURE_PREFIX}{error}"),
                    Some(error.to_string()),
                )
            }
        };
        let (report, report_failure) = match report {
            Ok(text) => (text.trim().to_string(), None),
            Err(error) => {
                tracing::warn!(error = %error, "report generation failed");
                (REPORT_FAILURE_TEXT.to_string(), Some(error.to_string()))
            }
        };

        Artifacts {
            viz_code,
            report,
            viz_failure,
            report_failure,
        }
    }
}

fn join_contained(
    handle: thread::ScopedJoinHandle<'_, Result<String, OracleError>>,
) -> Result<String, OracleError> {
    handle.join().unwrap_or_else(|_| {
        Err(OracleError::Unavailable(
            "generation worker panicked".to_string(),
        ))
    })
}

#[must_use]
pub fn build_visualization_request(table: &TabularResult, question: &str) -> CompletionRequest {
    let columns = table
        .columns()
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sample = table.to_markdown(VISUALIZATION_SAMPLE_ROWS);

    let system = format!(
        r#"당신은 데이터 시각화 전문가입니다. Rhai 스크립트로 차트를 그립니다.
결과 데이터는 변수 `df`에 바인딩되어 있습니다.
컬럼: [{columns}]
데이터 예시:
{sample}

사용자 질문: "{question}"

[사용 가능한 API]
- df.columns, df.len(), df["컬럼"], df.column("컬럼"), df.head(n), df.drop_duplicates(), df.sort_values("컬럼", true/false)
- plt.figure(가로, 세로), plt.bar(x, y), plt.barh(y, width), plt.plot(x, y), plt.scatter(x, y), plt.pie(values, labels)
- plt.title(text), plt.xlabel(text), plt.ylabel(text), plt.xticks(회전각도), plt.legend(), plt.grid(true), plt.tight_layout()
- sns.barplot(df, "x컬럼", "y컬럼"), sns.lineplot(df, "x컬럼", "y컬럼"), sns.scatterplot(df, "x컬럼", "y컬럼")
- 선택 인자로 계열 이름을 넘길 수 있습니다: plt.bar(x, y, "이름")

[요구사항]
1. 사용자 요청의 분석적 가치를 극대화하는 시각화를 작성합니다.
2. 한글 폰트 설정은 이미 되어 있습니다.
3. `plt.figure(10, 6)`으로 그래프 크기를 설정하세요.
4. `plt.show()`는 절대 사용하지 마세요.
5. 오직 실행 가능한 Rhai 코드만 출력하세요. 설명 문장은 쓰지 마세요.
6. 변수명은 `df`를 사용하세요.
7. `df.drop_duplicates()`로 중복 행을 제거한 뒤 그리세요.
8. 파일 저장, import, eval은 사용할 수 없습니다."#
    );

    CompletionRequest::new(system, VISUALIZATION_USER_PROMPT).with_temperature(0.0)
}

#[must_use]
pub fn build_report_request(table: &TabularResult, question: &str) -> CompletionRequest {
    let sample = table.to_markdown(REPORT_SAMPLE_ROWS);
    CompletionRequest::new(
        REPORT_SYSTEM_PROMPT,
        format!("질문: {question}\n데이터:\n{sample}"),
    )
    .with_temperature(0.5)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_report_request, build_visualization_request};
    use crate::models::TabularResult;

    fn table(rows: usize) -> TabularResult {
        TabularResult::new(
            vec!["시도".to_string(), "도서관수".to_string()],
            (0..rows)
                .map(|index| vec![json!(format!("지역{index}")), json!(index)])
                .collect(),
            false,
        )
    }

    #[test]
    fn visualization_prompt_embeds_columns_sample_and_constraints() {
        let request = build_visualization_request(&table(8), "시도별 도서관 수");
        let system = request.system_prompt().expect("system prompt");

        assert_eq!(request.temperature, 0.0);
        assert!(system.contains(r#"컬럼: ["시도", "도서관수"]"#));
        assert!(system.contains("| 4 | 지역4 | 4 |"));
        assert!(!system.contains("지역5"));
        assert!(system.contains("plt.figure(10, 6)"));
        assert!(system.contains("`plt.show()`는 절대 사용하지 마세요"));
        assert!(system.contains("df.drop_duplicates()"));
        assert!(system.contains("사용자 질문: \"시도별 도서관 수\""));
    }

    #[test]
    fn report_prompt_uses_ten_rows_and_warmer_temperature() {
        let request = build_report_request(&table(12), "질문");
        let user = request.user_prompt().expect("user prompt");

        assert_eq!(request.temperature, 0.5);
        assert!(user.starts_with("질문: 질문\n데이터:\n"));
        assert!(user.contains("지역9"));
        assert!(!user.contains("지역10"));
    }
}
