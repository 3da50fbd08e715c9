#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use libinsight::cli::app::{Cli, Command, RuntimeArgs};
use libinsight::cli::commands;
use libinsight::config::{PathOverrides, RuntimePaths};
use libinsight::models::EnvelopeCommandFailure;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_TURN_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    libinsight::telemetry::init(&cli.runtime.log_level);

    let command_name = command_name(&cli.command);
    println!("libinsight: starting `{command_name}`");

    match execute(cli) {
        Ok(()) => {
            println!("libinsight: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            eprintln!("libinsight: failed `{command_name}` (exit_code={exit_code})");
            eprintln!("{error:#}");
            exit_code
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::ask::run(&args, &runtime_paths)
        }
        Command::Chat(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::chat::run(&args, &runtime_paths)
        }
        Command::Sql(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::sql::run(&args, &runtime_paths)
        }
        Command::Schema(args) => commands::schema::run(&args),
        Command::Load(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::load::run(&args, &runtime_paths)
        }
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<EnvelopeCommandFailure>().is_some() {
        EXIT_TURN_FAILURE
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ask(_) => "ask",
        Command::Chat(_) => "chat",
        Command::Sql(_) => "sql",
        Command::Schema(_) => "schema",
        Command::Load(_) => "load",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    libinsight::config::resolve_runtime_paths(
        &home_dir,
        &cwd,
        PathOverrides {
            data_dir: args.data_dir.as_deref(),
            db_path: args.db_path.as_deref(),
            out_dir: args.out_dir.as_deref(),
        },
    )
}
