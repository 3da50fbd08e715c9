use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::emit_envelope;
use crate::catalog::SchemaCatalog;
use crate::models::ResponseEnvelope;
use crate::synth::draft_json_schema;

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Print the catalog as a JSON envelope instead of prompt text.
    #[arg(long, default_value_t = false, conflicts_with = "response_schema")]
    pub json: bool,

    /// Print the JSON Schema the generation service is asked to follow.
    #[arg(long, default_value_t = false)]
    pub response_schema: bool,
}

pub fn run(args: &SchemaArgs) -> Result<()> {
    let catalog = SchemaCatalog::library();

    if args.response_schema {
        let encoded = serde_json::to_string_pretty(&draft_json_schema())
            .context("failed to encode draft schema")?;
        println!("{encoded}");
        return Ok(());
    }

    if args.json {
        let envelope = ResponseEnvelope::ok("schema", json!({ "tables": catalog.tables() }))
            .with_meta("table_count", json!(catalog.tables().len()));
        return emit_envelope(envelope);
    }

    print!("{}", catalog.render_prompt_text());
    Ok(())
}
