use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    ask::AskArgs, chat::ChatArgs, load::LoadArgs, schema::SchemaArgs, sql::SqlArgs,
};
use crate::oracle::OracleSettings;
use crate::oracle::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
use crate::pipeline::PipelineSettings;
use crate::render::{DEFAULT_MAX_OPERATIONS, RenderBudget};
use crate::store::DEFAULT_ROW_CAP;

#[derive(Debug, Parser)]
#[command(
    name = "libinsight",
    version,
    about = "Ask questions about library statistics in plain language"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Log filter for stderr diagnostics, e.g. `info` or `libinsight=debug`.
    #[arg(long, global = true, env = "LIBINSIGHT_LOG", default_value = "warn")]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Ask(AskArgs),
    Chat(ChatArgs),
    Sql(SqlArgs),
    Schema(SchemaArgs),
    Load(LoadArgs),
}

#[derive(Debug, Clone, Args)]
pub struct OracleArgs {
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value = DEFAULT_BASE_URL, value_name = "URL")]
    pub base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Request the strict `{sql, explanation}` JSON Schema instead of plain JSON mode.
    #[arg(long, default_value_t = false)]
    pub strict_json_schema: bool,
}

impl OracleArgs {
    #[must_use]
    pub fn settings(&self) -> OracleSettings {
        OracleSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    #[arg(long, default_value_t = DEFAULT_ROW_CAP)]
    pub row_cap: usize,

    #[arg(long, default_value_t = 5_000, value_name = "MS")]
    pub render_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_OPERATIONS)]
    pub render_max_operations: u64,
}

impl PipelineArgs {
    #[must_use]
    pub fn settings(&self, db_path: &Path, strict_json_schema: bool) -> PipelineSettings {
        PipelineSettings {
            row_cap: self.row_cap.max(1),
            render_budget: RenderBudget {
                max_operations: self.render_max_operations,
                wall_clock: Duration::from_millis(self.render_timeout_ms),
            },
            strict_json_schema,
            ..PipelineSettings::new(db_path)
        }
    }
}
