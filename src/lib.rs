//! warehouse-insight: warehouse placement by customer density clustering and
//! delivery/economic statistics over e-commerce order records.
//!
//! Cleaned input tables feed two independent stages, the allocation engine
//! and the metric calculator, whose results are assembled into one report.

pub mod allocation;
pub mod calculator;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod stats;
pub mod store;

// Re-export public items for easier access
pub use allocation::{Allocation, AllocationInputs, WarehouseAllocator, WarehouseCandidate};
pub use calculator::{CalculatorInputs, MetricCalculator, Statistics};
pub use cli::Args;
pub use config::{AllocationConfig, CalculatorConfig, Config, SchemaMapping};
pub use data::{load_tables, InputPaths};
pub use error::{InsightError, InsightResult};
pub use events::{EventSink, MemorySink, StageEvent, TracingSink};
pub use model::{fit_kmeans, KMeansModel, KMeansParams};
pub use records::CleanedTables;
pub use report::{RunReport, StageFailure};
pub use store::{DocumentStore, JsonDirStore};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
