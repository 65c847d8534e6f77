//! Command-line entry point: forecast every metric of a cleaned table

use anyhow::Context;
use clap::Parser;
use market_forecast::{CancellationFlag, EngineConfig, MetricTable, Orchestrator, TableLayout};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "market-forecast")]
#[command(about = "Forecast AI market metrics and derive maturity, risk and anomaly signals")]
struct Cli {
    /// Cleaned metric table (CSV)
    #[arg(short, long)]
    data: PathBuf,

    /// Table layout: long (metric,region,timestamp,value) or wide (Year,<metrics>)
    #[arg(short, long, default_value = "long")]
    layout: TableLayout,

    /// Engine configuration (TOML); defaults apply to missing keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identifier stamped on every output record
    #[arg(long)]
    run_id: Option<String>,

    /// Override the configured forecast horizon
    #[arg(long)]
    horizon: Option<usize>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(horizon) = cli.horizon {
        config.horizon = horizon;
    }

    let table = MetricTable::from_csv(&cli.data, cli.layout)
        .with_context(|| format!("loading {}", cli.data.display()))?;
    tracing::info!("Loaded {} series from {}", table.len(), cli.data.display());

    let orchestrator = Orchestrator::new(config)?;
    let run_id = cli
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run(Arc::new(table), &run_id, &cancel).await;
    let json = serde_json::to_string_pretty(&report)?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
