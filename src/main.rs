use anyhow::{Context, Result};
use clap::Parser;
use prop_ev::config::Config;
use prop_ev::feed::{FileSnapshotSource, SnapshotSource};
use prop_ev::pipeline::build_report;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prop-ev")]
#[command(about = "Rank player-prop plays in one odds snapshot")]
#[command(version)]
struct Args {
    /// Snapshot directory (quotes.jsonl, context.json, optional extras)
    snapshot_dir: PathBuf,

    /// TOML run configuration; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    // stdout carries the report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prop_ev=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let snapshot = FileSnapshotSource::new(args.snapshot_dir.clone()).load_snapshot()?;
    let report = build_report(&snapshot, &config).context("Invalid configuration")?;
    let json = report.to_json().context("Failed to serialize report")?;

    match &args.out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
