//! Run orchestration: both analyses over the same cleaned tables

use crate::allocation::{AllocationInputs, WarehouseAllocator};
use crate::calculator::{CalculatorInputs, MetricCalculator};
use crate::config::Config;
use crate::events::{EventSink, StageEvent};
use crate::records::CleanedTables;
use crate::report::{RunReport, StageFailure};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{info, warn};

pub const CALCULATOR_STAGE: &str = "calculator";
pub const ALLOCATION_STAGE: &str = "allocation";

/// Run the calculator and the allocation engine, timestamped now
pub fn run(tables: &CleanedTables, config: &Config, sink: &dyn EventSink) -> RunReport {
    run_at(tables, config, sink, Utc::now())
}

/// Run both stages independently and assemble the report
///
/// A failing stage is recorded in `stage_failures`; the other stage still
/// contributes its results.
pub fn run_at(
    tables: &CleanedTables,
    config: &Config,
    sink: &dyn EventSink,
    timestamp: DateTime<Utc>,
) -> RunReport {
    let started = Instant::now();
    let mut failures = Vec::new();

    info!("Computing delivery and economic statistics");
    let calculator = MetricCalculator::new(&config.calculator, sink);
    let statistics = match calculator.calculate(CalculatorInputs {
        customers: &tables.customers,
        orders: &tables.orders,
        order_items: &tables.order_items,
        products: &tables.products,
        economic: &tables.economic,
    }) {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Stage {} failed: {}", CALCULATOR_STAGE, e);
            failures.push(StageFailure::new(CALCULATOR_STAGE, &e));
            None
        }
    };

    info!("Allocating warehouse candidates");
    let allocator = WarehouseAllocator::new(&config.allocation, sink);
    let allocation = match allocator.allocate(AllocationInputs {
        customers: &tables.customers,
        geolocation: &tables.geolocation,
        orders: &tables.orders,
        order_items: &tables.order_items,
        products: &tables.products,
    }) {
        Ok(allocation) => {
            info!(
                "{} warehouse candidates from {} top-level clusters ({} outliers trimmed)",
                allocation.candidates.len(),
                allocation.n_clusters,
                allocation.total_outliers
            );
            Some(allocation)
        }
        Err(e) => {
            warn!("Stage {} failed: {}", ALLOCATION_STAGE, e);
            failures.push(StageFailure::new(ALLOCATION_STAGE, &e));
            None
        }
    };

    let report = RunReport::assemble(timestamp, statistics, allocation, failures);
    sink.record(
        StageEvent::new("pipeline.run", started.elapsed())
            .with_count("warehouses", report.warehouses.len())
            .with_count("stage_failures", report.stage_failures.len()),
    );
    report
}
