//! warehouse-insight: load e-commerce records, place warehouse candidates and
//! relate delivery performance to economic indicators.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warehouse_insight::data::load_tables;
use warehouse_insight::events::TracingSink;
use warehouse_insight::store::{persist_report, JsonDirStore};
use warehouse_insight::{pipeline, Args};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let start_time = Instant::now();
    let config = args.load_config()?;

    // Step 1: Load and clean data
    info!("Loading tables from {}", args.data_dir.display());
    let data_start = Instant::now();
    let tables = load_tables(
        &args.input_paths(),
        &config.schema,
        &config.calculator.delivered_status,
    )?;
    info!("Data loaded in {:.2}s", data_start.elapsed().as_secs_f64());

    // Step 2: Compute statistics and allocate warehouses
    let report = pipeline::run(&tables, &config, &TracingSink);
    for failure in &report.stage_failures {
        warn!("{} failed ({}): {}", failure.stage, failure.kind, failure.message);
    }

    // Step 3: Persist
    let mut store = JsonDirStore::open(&args.output_dir)?;
    persist_report(&mut store, &report)?;
    drop(store);

    info!(
        "Pipeline complete in {:.2}s - {} warehouses, {} failed stages, results in {}",
        start_time.elapsed().as_secs_f64(),
        report.warehouses.len(),
        report.stage_failures.len(),
        args.output_dir.display()
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
