pub mod ask;
pub mod chat;
pub mod load;
pub mod schema;
pub mod sql;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::models::conversation::EMPTY_RESULT_MESSAGE;
use crate::models::{ResponseEnvelope, TurnOutcome};
use crate::render::RenderedImage;

/// Prints a successful envelope, or hands a failed one to `main` as the error.
pub fn emit_envelope(envelope: ResponseEnvelope) -> Result<()> {
    if !envelope.ok {
        return Err(envelope.into_failure());
    }

    let encoded =
        serde_json::to_string(&envelope).context("failed to encode response envelope")?;
    println!("{encoded}");
    Ok(())
}

pub fn write_figure(out_dir: &Path, image: &RenderedImage) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let path = out_dir.join(format!("figure-{stamp}.svg"));
    std::fs::write(&path, &image.svg)
        .with_context(|| format!("failed to write figure: {}", path.display()))?;
    Ok(path)
}

/// Envelope for one pipeline turn. Synthesis, guard and execution failures are errors;
/// empty results and render faults are warnings on an ok envelope.
#[must_use]
pub fn turn_envelope(
    command: &str,
    outcome: &TurnOutcome,
    row_cap: usize,
    figure_path: Option<&Path>,
) -> ResponseEnvelope {
    let query = outcome.query();
    let class = outcome.failure_class();
    let query_json = json!({
        "sql": query.sql,
        "explanation": query.explanation,
        "origin": query.origin,
    });

    let envelope = match outcome {
        TurnOutcome::SynthesisFailed(_) => {
            let code = class.map_or("generation_malformed", |class| class.code());
            ResponseEnvelope::error(command, code, outcome.summary())
                .with_error_details(json!({ "query": query_json }))
        }
        TurnOutcome::UnsafeQuery { rejection, .. } => {
            let mut details = rejection.details();
            details["query"] = query_json;
            ResponseEnvelope::error(command, "sql_guardrail_violation", &rejection.message)
                .with_error_details(details)
        }
        TurnOutcome::ExecutionFailed { error, .. } => {
            ResponseEnvelope::error(command, "query_execution_failed", "query execution failed")
                .with_error_details(json!({
                    "stage": error.stage,
                    "cause": error.message,
                    "query": query_json,
                }))
        }
        TurnOutcome::EmptyResult { table, .. } => ResponseEnvelope::ok(
            command,
            json!({
                "query": query_json,
                "columns": table.columns(),
                "rows": Value::Array(Vec::new()),
                "row_count": 0,
            }),
        )
        .with_warning("empty_result", EMPTY_RESULT_MESSAGE),
        TurnOutcome::Answered(bundle) => {
            let mut data = bundle.to_json(row_cap);
            data["figure_path"] = json!(figure_path.map(|path| path.display().to_string()));
            let mut envelope = ResponseEnvelope::ok(command, data);

            if let Some(error) = &bundle.render_error {
                envelope = envelope
                    .with_warning("render_failed", &error.message)
                    .with_warning_details(json!({ "kind": error.kind, "code": error.code }));
            }
            if let Some(failure) = &bundle.artifacts.viz_failure {
                envelope = envelope.with_warning("visualization_unavailable", failure);
            }
            if let Some(failure) = &bundle.artifacts.report_failure {
                envelope = envelope.with_warning("report_unavailable", failure);
            }
            envelope
        }
    };

    envelope.with_meta(
        "failure_class",
        json!(class.map(|class| class.code())),
    )
}
