//! One question at a time: synthesize, guard, execute, generate artifacts, render.
//!
//! Every stage boundary turns a failure into a [`TurnOutcome`] variant; nothing here
//! returns an error or panics into the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::artifacts::ArtifactSynthesizer;
use crate::guard::QueryGuard;
use crate::models::{ConversationLog, ConversationTurn, ResultBundle, TurnOutcome};
use crate::oracle::CompletionOracle;
use crate::render::{RenderBudget, SandboxedRenderer};
use crate::store::{DEFAULT_ROW_CAP, ExecutionBridge, analyze_query_profile};
use crate::synth::QuerySynthesizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub db_path: PathBuf,
    pub row_cap: usize,
    pub render_budget: RenderBudget,
    pub strict_json_schema: bool,
}

impl PipelineSettings {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            row_cap: DEFAULT_ROW_CAP,
            render_budget: RenderBudget::default(),
            strict_json_schema: false,
        }
    }
}

pub struct Session<'a> {
    oracle: &'a dyn CompletionOracle,
    settings: PipelineSettings,
    guard: QueryGuard,
    bridge: ExecutionBridge,
    renderer: SandboxedRenderer,
    log: ConversationLog,
}

impl<'a> Session<'a> {
    #[must_use]
    pub fn new(oracle: &'a dyn CompletionOracle, settings: PipelineSettings) -> Self {
        let bridge = ExecutionBridge::new(settings.db_path.clone(), settings.row_cap);
        let renderer = SandboxedRenderer::new(settings.render_budget);
        Self {
            oracle,
            settings,
            guard: QueryGuard,
            bridge,
            renderer,
            log: ConversationLog::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Runs one turn and appends both the question and the outcome to the log.
    pub fn ask(&mut self, question: &str) -> &ConversationTurn {
        self.log.push_user(question);
        let outcome = self.run_turn(question);
        self.log.push_assistant(outcome)
    }

    #[must_use]
    pub fn run_turn(&self, question: &str) -> TurnOutcome {
        let span = tracing::info_span!("turn", model = self.oracle.model_id());
        let _entered = span.enter();

        let query = QuerySynthesizer::new(self.oracle)
            .with_strict_json_schema(self.settings.strict_json_schema)
            .synthesize(question);
        if query.is_sentinel() {
            return TurnOutcome::SynthesisFailed(query);
        }

        let validated = match self.guard.validate(&query.sql) {
            Ok(validated) => validated,
            Err(rejection) => {
                tracing::warn!(reason = rejection.reason.as_str(), "query rejected by guard");
                return TurnOutcome::UnsafeQuery { query, rejection };
            }
        };

        let profile = analyze_query_profile(validated.as_str());
        let hints = profile.hints();
        if !hints.is_empty() {
            tracing::warn!(hints = ?hints, "generated SQL departs from catalog conventions");
        }
        let started = Instant::now();
        let table = match self.bridge.execute(&validated) {
            Ok(table) => Arc::new(table),
            Err(error) => return TurnOutcome::ExecutionFailed { query, error },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if table.is_empty() {
            tracing::info!("query returned no rows; skipping artifacts");
            return TurnOutcome::EmptyResult { query, table };
        }

        let artifacts = ArtifactSynthesizer::new(self.oracle).synthesize_artifacts(&table, question);
        let (image, render_error) = if artifacts.has_visualization() {
            match self.renderer.render(&artifacts.viz_code, &table) {
                Ok(image) => (Some(image), None),
                Err(error) => (None, Some(error)),
            }
        } else {
            (None, None)
        };

        TurnOutcome::Answered(Box::new(ResultBundle {
            query,
            table,
            profile,
            duration_ms,
            artifacts,
            image,
            render_error,
        }))
    }
}
