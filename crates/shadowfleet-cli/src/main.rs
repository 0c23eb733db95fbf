//! shadowfleet CLI — offline tooling for the agent fleet monitor.
//!
//! `replay` boots an in-process monitor, feeds it a recorded message log and
//! prints the resulting fleet status. `check-config` validates a config file.

mod cli;
mod replay;
mod table;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use shadowfleet_kernel::config::{default_config_path, load_config, try_load_config};
use shadowfleet_kernel::FleetMonitor;
use shadowfleet_types::config::FleetConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

fn init_tracing_stderr(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr(cli.json_logs);

    let result = match cli.command {
        Commands::Replay { file, sweep, json } => {
            cmd_replay(cli.config.as_deref(), &file, sweep, json)
        }
        Commands::CheckConfig { path } => cmd_check_config(path.or(cli.config)),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

/// An explicitly named config must be valid; the default one may be absent.
fn resolve_config(path: Option<&Path>) -> Result<FleetConfig> {
    match path {
        Some(path) => try_load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(load_config(None)),
    }
}

fn cmd_replay(config_path: Option<&Path>, file: &Path, sweep: bool, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    rt.block_on(replay_and_report(config, reader, sweep, json))
}

async fn replay_and_report(
    config: FleetConfig,
    reader: BufReader<File>,
    sweep: bool,
    json: bool,
) -> Result<()> {
    let monitor = FleetMonitor::new(config);
    let report = replay::replay(&monitor, reader, sweep).await?;
    let snapshots = monitor.snapshots();
    monitor.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!("{}", table::status_table(&snapshots));
    let counts = table::health_counts(&snapshots)
        .iter()
        .map(|(health, n)| format!("{n} {health}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "{} agents ({counts}); {} deliveries applied, {} dropped, {} lines skipped",
        snapshots.len(),
        report.applied,
        report.dropped,
        report.skipped,
    );
    if let Some(summary) = report.sweep {
        println!(
            "Sweep: {} checked, {} overdue",
            summary.total_checked, summary.overdue
        );
    }
    Ok(())
}

fn cmd_check_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    let config = try_load_config(&path)
        .with_context(|| format!("Invalid config {}", path.display()))?;

    println!("{} {}", "\u{2714}".green(), format!("Config OK: {}", path.display()).bold());
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sweep_interval_secs = 0").unwrap();
        assert!(resolve_config(Some(&path)).is_err());
    }

    #[test]
    fn test_check_config_accepts_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "heartbeat_timeout_secs = 15\n\n[necessity]\nsensor = \"optional\"\n",
        )
        .unwrap();
        assert!(cmd_check_config(Some(path)).is_ok());
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from(["shadowfleet", "replay", "fleet.jsonl", "--sweep"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Replay {
                sweep: true,
                json: false,
                ..
            }
        ));
    }
}
