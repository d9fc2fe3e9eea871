use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use geoharvest_common::HarvestConfig;
use geoharvest_scout::Harvester;
use geoharvest_store::RunState;

#[derive(Parser)]
#[command(name = "geoharvest", about = "Harvest geolocated reports into a GeoJSON store")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true, default_value = "./config/geoharvest.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, enrich and commit one batch
    Run {
        /// Stop after validation; never write the store
        #[arg(long)]
        dry_run: bool,

        /// Also write the run summary as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
    /// Load and validate the store without changing it
    Check,
    /// Run the configured export sinks over the stored collection
    Export,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("geoharvest failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geoharvest=info,warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = HarvestConfig::load(&cli.config)
        .with_context(|| format!("Config not usable: {}. Create one or pass --config <path>", cli.config.display()))?;
    config.log_summary();

    let harvester = Harvester::from_config(config)?;

    match cli.command {
        Command::Run {
            dry_run,
            summary_json,
        } => {
            let summary = tokio::select! {
                result = harvester.run(dry_run) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, nothing committed by this run");
                    return Ok(ExitCode::from(130));
                }
            };

            println!("{summary}");
            if let Some(path) = summary_json {
                summary.write_json(&path)?;
                info!(path = %path.display(), "Wrote run summary");
            }

            if summary.state == Some(RunState::RolledBack) {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let features = harvester.check()?;
            println!("Store OK: {features} features");
            Ok(ExitCode::SUCCESS)
        }
        Command::Export => {
            let failed = harvester.export()?;
            if failed > 0 {
                warn!(failed, "Some export sinks failed");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
