use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::emit_envelope;
use crate::catalog::SchemaCatalog;
use crate::config::{RuntimePaths, resolve_user_path};
use crate::models::ResponseEnvelope;
use crate::store::load::load_csv_directory;

#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
    /// Directory holding `T1_도서관기본정보.csv` through `T6_지역인구.csv` (defaults to cwd).
    #[arg(long, value_name = "DIR")]
    pub source_dir: Option<PathBuf>,
}

pub fn run(args: &LoadArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let source_dir = match &args.source_dir {
        Some(path) => resolve_user_path(path, &runtime_paths.home_dir, &runtime_paths.cwd)?,
        None => runtime_paths.cwd.clone(),
    };

    let report = load_csv_directory(&source_dir, &runtime_paths.db_path, SchemaCatalog::library())?;
    let mut envelope = ResponseEnvelope::ok("load", json!(report))
        .with_meta("source_dir", json!(source_dir.display().to_string()))
        .with_meta("total_rows", json!(report.total_rows()));

    for table in &report.tables {
        if !table.missing_columns.is_empty() {
            envelope = envelope
                .with_warning(
                    "source_columns_missing",
                    format!("`{}` is missing catalog columns; they were loaded as NULL", table.table),
                )
                .with_warning_details(json!({ "columns": table.missing_columns }));
        }
    }
    emit_envelope(envelope)
}
