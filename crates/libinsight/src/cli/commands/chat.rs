use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::write_figure;
use crate::cli::app::{OracleArgs, PipelineArgs};
use crate::config::RuntimePaths;
use crate::models::tabular::display_value;
use crate::models::{GREETING, TurnOutcome};
use crate::oracle::OpenAiOracle;
use crate::pipeline::Session;

const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Args)]
pub struct ChatArgs {
    #[command(flatten)]
    pub oracle: OracleArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub fn run(args: &ChatArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let oracle = OpenAiOracle::new(args.oracle.settings());
    let settings = args
        .pipeline
        .settings(&runtime_paths.db_path, args.oracle.strict_json_schema);
    let mut session = Session::new(&oracle, settings);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_loop(
        &mut session,
        stdin.lock(),
        stdout.lock(),
        &runtime_paths.out_dir,
    )
}

/// Line-oriented chat: `/quit` ends the session, `/history` replays the log.
pub fn run_loop(
    session: &mut Session<'_>,
    input: impl BufRead,
    mut output: impl Write,
    out_dir: &Path,
) -> Result<()> {
    writeln!(output, "{GREETING}")?;
    prompt(&mut output)?;

    for line in input.lines() {
        let line = line.context("failed to read chat input")?;
        let question = line.trim();
        match question {
            "" => {}
            "/quit" | "/exit" => break,
            "/history" => {
                for entry in session.log().transcript() {
                    writeln!(output, "{entry}")?;
                }
            }
            _ => {
                let turn = session.ask(question);
                writeln!(output, "{}", turn.content)?;
                if let Some(outcome) = &turn.outcome {
                    write_outcome(&mut output, outcome, out_dir)?;
                }
            }
        }
        prompt(&mut output)?;
    }

    output.flush()?;
    Ok(())
}

fn prompt(output: &mut impl Write) -> Result<()> {
    write!(output, "> ")?;
    output.flush()?;
    Ok(())
}

fn write_outcome(output: &mut impl Write, outcome: &TurnOutcome, out_dir: &Path) -> Result<()> {
    match outcome {
        TurnOutcome::SynthesisFailed(query) => {
            writeln!(output, "[SQL] {}", query.sql)?;
        }
        TurnOutcome::UnsafeQuery { rejection, .. } => {
            writeln!(output, "[SQL] {}", rejection.offending_sql)?;
        }
        TurnOutcome::ExecutionFailed { query, .. } | TurnOutcome::EmptyResult { query, .. } => {
            writeln!(output, "[SQL] {}", query.sql)?;
        }
        TurnOutcome::Answered(bundle) => {
            writeln!(output, "[SQL] {}", bundle.query.sql)?;
            writeln!(output, "[데이터] {} rows", bundle.table.row_count())?;
            writeln!(output, "{}", bundle.table.columns().join(" | "))?;
            for row in bundle.table.rows().iter().take(PREVIEW_ROWS) {
                let cells = row.iter().map(display_value).collect::<Vec<_>>();
                writeln!(output, "{}", cells.join(" | "))?;
            }

            match (&bundle.image, &bundle.render_error) {
                (Some(image), _) => match write_figure(out_dir, image) {
                    Ok(path) => writeln!(output, "[시각화] {}", path.display())?,
                    Err(error) => {
                        tracing::warn!("figure could not be saved: {error:#}");
                        writeln!(output, "[시각화 저장 실패] {error:#}")?;
                    }
                },
                (None, Some(error)) => {
                    writeln!(output, "[시각화 실패] {}", error.message)?;
                    writeln!(output, "{}", error.code)?;
                }
                (None, None) => {
                    writeln!(output, "{}", bundle.artifacts.viz_code)?;
                }
            }
            writeln!(output, "[리포트]\n{}", bundle.artifacts.report)?;
        }
    }
    Ok(())
}
