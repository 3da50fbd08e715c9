use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::artifacts::Artifacts;
use crate::guard::GuardRejection;
use crate::models::TabularResult;
use crate::render::{RenderError, RenderedImage};
use crate::store::{ExecutionError, QueryProfile};
use crate::synth::{SynthesisFailureKind, SynthesizedQuery};

pub const GREETING: &str = "안녕하세요! 도서관 데이터에 대해 물어보세요.";
pub const EMPTY_RESULT_MESSAGE: &str = "조건에 맞는 데이터가 없습니다.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Error taxonomy for one turn. None of these end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    GenerationMalformed,
    OracleUnavailable,
    UnsafeQuery,
    ExecutionFailure,
    EmptyResult,
    RenderFailure,
}

impl FailureClass {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::GenerationMalformed => "generation_malformed",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::UnsafeQuery => "sql_guardrail_violation",
            Self::ExecutionFailure => "query_execution_failed",
            Self::EmptyResult => "empty_result",
            Self::RenderFailure => "render_failed",
        }
    }

    /// Informational classes leave the turn usable.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(self, Self::EmptyResult | Self::RenderFailure)
    }
}

/// Everything one answered question produced. Owned by its turn and never shared.
#[derive(Debug, Clone)]
pub struct ResultBundle {
    pub query: SynthesizedQuery,
    pub table: Arc<TabularResult>,
    pub profile: QueryProfile,
    pub duration_ms: u64,
    pub artifacts: Artifacts,
    pub image: Option<RenderedImage>,
    pub render_error: Option<RenderError>,
}

impl ResultBundle {
    #[must_use]
    pub fn to_json(&self, row_cap: usize) -> Value {
        let image = self.image.as_ref().map(|image| {
            json!({
                "width": image.width,
                "height": image.height,
                "series_count": image.series_count,
                "blank": image.is_blank(),
            })
        });

        json!({
            "query": {
                "sql": self.query.sql,
                "explanation": self.query.explanation,
                "origin": self.query.origin,
            },
            "columns": self.table.columns(),
            "rows": self.table.records(),
            "row_count": self.table.row_count(),
            "truncated": self.table.truncated(),
            "diagnostics": self.profile.diagnostics(
                self.duration_ms,
                row_cap,
                self.table.row_count(),
                self.table.truncated(),
            ),
            "viz_code": self.artifacts.viz_code,
            "report": self.artifacts.report,
            "image": image,
            "render_error": self.render_error,
        })
    }
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    SynthesisFailed(SynthesizedQuery),
    UnsafeQuery {
        query: SynthesizedQuery,
        rejection: GuardRejection,
    },
    ExecutionFailed {
        query: SynthesizedQuery,
        error: ExecutionError,
    },
    EmptyResult {
        query: SynthesizedQuery,
        table: Arc<TabularResult>,
    },
    Answered(Box<ResultBundle>),
}

impl TurnOutcome {
    #[must_use]
    pub fn query(&self) -> &SynthesizedQuery {
        match self {
            Self::SynthesisFailed(query)
            | Self::UnsafeQuery { query, .. }
            | Self::ExecutionFailed { query, .. }
            | Self::EmptyResult { query, .. } => query,
            Self::Answered(bundle) => &bundle.query,
        }
    }

    #[must_use]
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::SynthesisFailed(query) => Some(match query.failure().map(|failure| failure.kind) {
                Some(SynthesisFailureKind::OracleUnavailable) => FailureClass::OracleUnavailable,
                _ => FailureClass::GenerationMalformed,
            }),
            Self::UnsafeQuery { .. } => Some(FailureClass::UnsafeQuery),
            Self::ExecutionFailed { .. } => Some(FailureClass::ExecutionFailure),
            Self::EmptyResult { .. } => Some(FailureClass::EmptyResult),
            Self::Answered(bundle) => bundle
                .render_error
                .as_ref()
                .map(|_| FailureClass::RenderFailure),
        }
    }

    /// True when the turn ended before producing data.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure_class()
            .is_some_and(|class| !class.is_warning())
    }

    /// Chat text for the assistant turn.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::SynthesisFailed(query) => {
                format!("올바른 SQL 쿼리를 생성하지 못했습니다. 에러 원인: {}", query.explanation)
            }
            Self::UnsafeQuery { rejection, .. } => {
                format!("안전하지 않은 쿼리가 차단되었습니다: {}", rejection.message)
            }
            Self::ExecutionFailed { error, .. } => format!("SQL 실행 중 오류가 발생했습니다: {error}"),
            Self::EmptyResult { .. } => EMPTY_RESULT_MESSAGE.to_string(),
            Self::Answered(bundle) => bundle.query.explanation.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub outcome: Option<TurnOutcome>,
}

/// Append-only turn history owned by one session.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            turns: vec![ConversationTurn {
                role: Role::Assistant,
                content: GREETING.to_string(),
                outcome: None,
            }],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::User,
            content: content.into(),
            outcome: None,
        });
    }

    pub fn push_assistant(&mut self, outcome: TurnOutcome) -> &ConversationTurn {
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            content: outcome.summary(),
            outcome: Some(outcome),
        });
        &self.turns[self.turns.len() - 1]
    }

    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&TurnOutcome> {
        self.turns.iter().rev().find_map(|turn| turn.outcome.as_ref())
    }

    /// One line per turn, for replaying the history as text.
    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        self.turns
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let marker = turn
                    .outcome
                    .as_ref()
                    .and_then(TurnOutcome::failure_class)
                    .map(|class| format!(" [{}]", class.code()))
                    .unwrap_or_default();
                format!("{speaker}{marker}: {}", turn.content)
            })
            .collect()
    }
}
