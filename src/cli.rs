//! Command-line interface definitions and argument parsing

use crate::config::Config;
use crate::data::InputPaths;
use clap::Parser;
use std::path::PathBuf;

/// Warehouse placement and delivery/economic analysis over e-commerce records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the input CSV files
    #[arg(short, long, default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "olist_customers_dataset.csv")]
    pub customers_file: String,

    #[arg(long, default_value = "olist_geolocation_dataset.csv")]
    pub geolocation_file: String,

    #[arg(long, default_value = "olist_orders_dataset.csv")]
    pub orders_file: String,

    #[arg(long, default_value = "olist_order_items_dataset.csv")]
    pub order_items_file: String,

    #[arg(long, default_value = "olist_products_dataset.csv")]
    pub products_file: String,

    /// Monthly indicators; skipped when the file does not exist
    #[arg(long, default_value = "brazil_economy_indicators.csv")]
    pub economic_file: String,

    /// Number of top-level clusters (derived from the customer count when omitted)
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<u64>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Random seed for K-Means initialization
    #[arg(long)]
    pub seed: Option<u64>,

    /// JSON configuration file (schema mapping and thresholds)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of the JSON document store
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn input_paths(&self) -> InputPaths {
        InputPaths {
            customers: self.data_dir.join(&self.customers_file),
            geolocation: self.data_dir.join(&self.geolocation_file),
            orders: self.data_dir.join(&self.orders_file),
            order_items: self.data_dir.join(&self.order_items_file),
            products: self.data_dir.join(&self.products_file),
            economic: Some(self.data_dir.join(&self.economic_file)),
        }
    }

    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> crate::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(k) = self.clusters {
            if k == 0 {
                anyhow::bail!("Number of clusters must be positive");
            }
            config.allocation.clusters = Some(k);
        }
        if let Some(max_iters) = self.max_iters {
            config.allocation.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            config.allocation.tolerance = tolerance;
        }
        if let Some(seed) = self.seed {
            config.allocation.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}
