//! Alpine Analytics - feature pipeline entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alpine_analytics::pipeline::{Orchestrator, RunSummary, StageId};
use alpine_analytics::storage::{load_config, Database, DatabasePaths};

mod cli;

use cli::{Cli, Command};

fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.databases.apply(&mut config);
    let paths = DatabasePaths::from(&config.database);

    match &cli.command {
        Command::Stages => {
            print_stages();
            return Ok(ExitCode::SUCCESS);
        }
        Command::Init => {
            let db = Database::open(&paths).context("Failed to open databases")?;
            db.init_raw_schema().context("Failed to create raw schema")?;
            tracing::info!(
                "Initialized {} and {}",
                paths.raw.display(),
                paths.aggregate.display()
            );
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run { .. } | Command::Update { .. } => {}
    }

    let Some((selection, mode)) = cli.command.plan() else {
        return Ok(ExitCode::SUCCESS);
    };

    tracing::info!("Starting alpine-analytics v{}", env!("CARGO_PKG_VERSION"));
    let orchestrator = Orchestrator::new(Arc::new(paths), config);
    let summary = orchestrator
        .run(&selection, &mode)
        .context("Pipeline run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(ExitCode::from(summary.exit_code()))
}

fn print_stages() {
    for phase in 1..=3u8 {
        println!("Phase {}:", phase);
        for id in StageId::ALL.iter().filter(|id| id.phase() == phase) {
            let note = if id.supports_incremental() {
                " (incremental)"
            } else {
                ""
            };
            println!("  {}{}", id, note);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} ({})", summary.run_id, summary.mode);
    if let Some(from) = summary.from_date {
        println!("Window from {}", from);
    }
    if let Some(races) = summary.window_races {
        println!("Races in window: {}", races);
    }
    for phase in &summary.phases {
        println!(
            "Phase {}: {} of {} succeeded",
            phase.phase,
            phase.succeeded(),
            phase.stages.len()
        );
        for stage in &phase.stages {
            match (&stage.failure, stage.rows_written) {
                (None, Some(rows)) => {
                    println!("  ok    {:<30} {:>8} rows {:>7} ms", stage.stage, rows, stage.duration_ms)
                }
                (None, None) => println!("  ok    {}", stage.stage),
                (Some(failure), _) => println!("  FAIL  {:<30} {}", stage.stage, failure),
            }
        }
    }
}
