//! Runs tracker scenarios against a simulated image provider.

mod scenarios;
mod simulated;

use std::time::Duration;

use clap::{Parser, ValueEnum};
use genstudio_core::{TrackerConfig, TrackerError, init_observability};

use crate::scenarios::{run_concurrent, run_persisted, run_single_image, run_timeout};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    Single,
    Timeout,
    Concurrent,
    Persisted,
    All,
}

#[derive(Debug, Parser)]
#[command(about = "Exercise the genstudio session and task tracker")]
struct Cli {
    #[arg(value_enum, default_value = "all")]
    scenario: Scenario,
    /// Simulated provider latency in milliseconds.
    #[arg(long, default_value_t = 150)]
    latency_ms: u64,
    /// Directory used by the persisted scenario.
    #[arg(long, default_value = "./out/sessions")]
    sessions_dir: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    let config = TrackerConfig::from_env()?;
    let latency = Duration::from_millis(cli.latency_ms);

    let run_all = matches!(cli.scenario, Scenario::All);
    if run_all || matches!(cli.scenario, Scenario::Single) {
        println!("=== single image ===");
        run_single_image(config.clone(), latency).await?;
    }
    if run_all || matches!(cli.scenario, Scenario::Timeout) {
        println!("=== timeout ===");
        run_timeout(config.clone(), latency).await?;
    }
    if run_all || matches!(cli.scenario, Scenario::Concurrent) {
        println!("=== concurrent ===");
        run_concurrent(config.clone(), latency).await?;
    }
    if run_all || matches!(cli.scenario, Scenario::Persisted) {
        println!("=== persisted ===");
        run_persisted(config, latency, &cli.sessions_dir).await?;
    }
    Ok(())
}
