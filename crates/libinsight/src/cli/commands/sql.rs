use std::time::Instant;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::emit_envelope;
use crate::config::RuntimePaths;
use crate::guard::QueryGuard;
use crate::models::ResponseEnvelope;
use crate::store::{DEFAULT_ROW_CAP, ExecutionBridge, analyze_query_profile};

const COMMAND: &str = "sql";

#[derive(Debug, Clone, Args)]
pub struct SqlArgs {
    #[arg(value_name = "SQL")]
    pub sql: String,

    #[arg(long, default_value_t = DEFAULT_ROW_CAP)]
    pub row_cap: usize,
}

/// Runs hand-written SQL through the same guard and read-only bridge as generated SQL.
pub fn run(args: &SqlArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let profile = analyze_query_profile(&args.sql);

    let validated = match QueryGuard.validate(&args.sql) {
        Ok(validated) => validated,
        Err(rejection) => {
            return emit_envelope(
                ResponseEnvelope::error(COMMAND, "sql_guardrail_violation", &rejection.message)
                    .with_meta("guardrail_checked", json!(true))
                    .with_meta(
                        "diagnostics",
                        profile.diagnostics(0, args.row_cap, 0, false),
                    )
                    .with_error_details(rejection.details()),
            );
        }
    };

    if args.row_cap == 0 {
        return emit_envelope(
            ResponseEnvelope::error(
                COMMAND,
                "query_row_cap_invalid",
                "row_cap must be greater than zero",
            )
            .with_meta("guardrail_checked", json!(true))
            .with_error_details(json!({ "row_cap": args.row_cap })),
        );
    }

    let bridge = ExecutionBridge::new(&runtime_paths.db_path, args.row_cap);
    let started = Instant::now();
    let result = bridge.execute(&validated);
    let duration_ms = started.elapsed().as_millis() as u64;

    let envelope = match result {
        Ok(table) => {
            let envelope = ResponseEnvelope::ok(
                COMMAND,
                json!({ "columns": table.columns(), "rows": table.records() }),
            )
            .with_meta("guardrail_checked", json!(true))
            .with_meta("row_count", json!(table.row_count()))
            .with_meta("truncated", json!(table.truncated()))
            .with_meta("row_cap", json!(args.row_cap))
            .with_meta("duration_ms", json!(duration_ms))
            .with_meta(
                "diagnostics",
                profile.diagnostics(
                    duration_ms,
                    args.row_cap,
                    table.row_count(),
                    table.truncated(),
                ),
            );
            if table.is_empty() {
                envelope.with_warning("empty_result", "query returned no rows")
            } else {
                envelope
            }
        }
        Err(error) => {
            ResponseEnvelope::error(COMMAND, "query_execution_failed", "query execution failed")
                .with_meta("guardrail_checked", json!(true))
                .with_meta("row_cap", json!(args.row_cap))
                .with_meta("duration_ms", json!(duration_ms))
                .with_meta(
                    "diagnostics",
                    profile.diagnostics(duration_ms, args.row_cap, 0, false),
                )
                .with_error_details(json!({
                    "stage": error.stage,
                    "cause": error.message,
                    "db_path": runtime_paths.db_path.display().to_string(),
                }))
        }
    };
    emit_envelope(envelope)
}
