#![forbid(unsafe_code)]

pub mod artifacts;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod guard;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod render;
pub mod store;
pub mod synth;
pub mod telemetry;
pub mod utils;

pub use cli::app::{Cli, Command};
