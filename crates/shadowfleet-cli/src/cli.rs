//! Clap CLI definitions for shadowfleet.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  shadowfleet replay fleet.jsonl              Replay a message log and print fleet status
  shadowfleet replay fleet.jsonl --sweep      Also run one timeout sweep after the replay
  shadowfleet check-config                    Validate ~/.shadowfleet/config.toml";

/// shadowfleet: agent fleet health monitor.
#[derive(Parser)]
#[command(name = "shadowfleet", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a JSON-lines message log through the monitor.
    Replay {
        /// File with one message per line.
        file: PathBuf,
        /// Run one timeout sweep after the last message.
        #[arg(long)]
        sweep: bool,
        /// Print shadow snapshots as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Validate a config file and print the effective settings.
    CheckConfig {
        /// Config file (defaults to ~/.shadowfleet/config.toml).
        path: Option<PathBuf>,
    },
}
