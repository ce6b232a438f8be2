// src/main.rs

use anyhow::Context;
use env_logger::Env;
use log::info;

use gold_market_analysis::{pipeline, AnalysisConfig};

fn main() -> anyhow::Result<()> {
    // Initialize environment variables
    dotenv::dotenv().ok();

    // Initialize the logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = AnalysisConfig::from_env().context("failed to load configuration")?;

    let report = pipeline::run(&config)
        .with_context(|| format!("analysis of {} failed", config.data_path.display()))?;

    info!(
        "Done: forest MAE {:.6}, network test MAE {:.6}, {} plots written to {}",
        report.forest.metrics.mae,
        report.network.test_mae,
        report.plots.len(),
        config.output_dir.display()
    );
    Ok(())
}
