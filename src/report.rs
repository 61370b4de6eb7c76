//! The per-run result record

use crate::allocation::{Allocation, ClusterLog, WarehouseCandidate};
use crate::calculator::{CategoryShare, DeliveryStats, EconomicAnalysis, Statistics};
use crate::error::InsightError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub total_customers: Option<usize>,
    pub total_items: Option<usize>,
    pub items_per_customer_avg: Option<f64>,
    pub total_warehouses: Option<usize>,
    pub avg_customers_per_warehouse: Option<f64>,
}

/// A stage that failed without aborting the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub kind: String,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: impl Into<String>, error: &InsightError) -> Self {
        Self {
            stage: stage.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result record of one run
///
/// Outputs of a failed stage stay `None` (or empty) while the other stage's
/// results are kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub metrics: RunMetrics,
    pub delivery_stats: Option<DeliveryStats>,
    pub economic_analysis: Option<EconomicAnalysis>,
    pub inventory_distribution: Vec<CategoryShare>,
    pub warehouses: Vec<WarehouseCandidate>,
    pub cluster_logs: Vec<ClusterLog>,
    pub stage_failures: Vec<StageFailure>,
}

impl RunReport {
    pub fn assemble(
        timestamp: DateTime<Utc>,
        statistics: Option<Statistics>,
        allocation: Option<Allocation>,
        stage_failures: Vec<StageFailure>,
    ) -> Self {
        let mut metrics = RunMetrics::default();
        let mut report = Self {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            metrics: RunMetrics::default(),
            delivery_stats: None,
            economic_analysis: None,
            inventory_distribution: Vec::new(),
            warehouses: Vec::new(),
            cluster_logs: Vec::new(),
            stage_failures,
        };

        if let Some(stats) = statistics {
            metrics.total_customers = Some(stats.metrics.total_customers);
            metrics.total_items = Some(stats.metrics.total_items);
            metrics.items_per_customer_avg = stats.metrics.items_per_customer_avg;
            report.delivery_stats = Some(stats.delivery_stats);
            report.economic_analysis = Some(stats.economic_analysis);
            report.inventory_distribution = stats.inventory_distribution;
        }

        if let Some(allocation) = allocation {
            let placed: usize = allocation.candidates.iter().map(|c| c.customer_count).sum();
            metrics.total_warehouses = Some(allocation.candidates.len());
            metrics.avg_customers_per_warehouse = if allocation.candidates.is_empty() {
                None
            } else {
                Some(placed as f64 / allocation.candidates.len() as f64)
            };
            report.warehouses = allocation.candidates;
            report.cluster_logs = allocation.cluster_logs;
        }

        report.metrics = metrics;
        report
    }

    pub fn is_complete(&self) -> bool {
        self.stage_failures.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
