use anyhow::{Result, bail};
use clap::Args;
use serde_json::json;

use super::{emit_envelope, turn_envelope, write_figure};
use crate::cli::app::{OracleArgs, PipelineArgs};
use crate::config::RuntimePaths;
use crate::models::TurnOutcome;
use crate::oracle::{CompletionOracle, OpenAiOracle};
use crate::pipeline::Session;

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(value_name = "QUESTION")]
    pub question: String,

    #[command(flatten)]
    pub oracle: OracleArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Skip writing the rendered SVG figure to the output directory.
    #[arg(long, default_value_t = false)]
    pub no_figure: bool,
}

pub fn run(args: &AskArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let oracle = OpenAiOracle::new(args.oracle.settings());
    let settings = args
        .pipeline
        .settings(&runtime_paths.db_path, args.oracle.strict_json_schema);
    let mut session = Session::new(&oracle, settings);

    let row_cap = session.settings().row_cap;
    let turn = session.ask(&args.question);
    let Some(outcome) = &turn.outcome else {
        bail!("turn finished without an outcome");
    };

    let figure_path = match outcome {
        TurnOutcome::Answered(bundle) if !args.no_figure => bundle
            .image
            .as_ref()
            .map(|image| write_figure(&runtime_paths.out_dir, image))
            .transpose()?,
        _ => None,
    };

    let envelope = turn_envelope("ask", outcome, row_cap, figure_path.as_deref())
        .with_meta("question", json!(args.question))
        .with_meta("model", json!(oracle.model_id()))
        .with_meta("db_path", json!(runtime_paths.db_path.display().to_string()));
    emit_envelope(envelope)
}
