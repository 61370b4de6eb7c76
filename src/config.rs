//! Run configuration: schema mapping, allocation tuning and calculator options

use crate::error::{InsightError, InsightResult};
use crate::records::Indicator;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Column names of every input table.
///
/// Validated once at the load boundary; the core only sees typed records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaMapping {
    pub customers: CustomerColumns,
    pub geolocation: GeolocationColumns,
    pub orders: OrderColumns,
    pub order_items: OrderItemColumns,
    pub products: ProductColumns,
    pub economic: EconomicColumns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerColumns {
    pub customer_id: String,
    pub zip_prefix: String,
    /// Optional; enables per-state delivery statistics
    pub state: String,
}

impl Default for CustomerColumns {
    fn default() -> Self {
        Self {
            customer_id: "customer_id".into(),
            zip_prefix: "customer_zip_code_prefix".into(),
            state: "customer_state".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationColumns {
    pub zip_prefix: String,
    pub lat: String,
    pub lng: String,
}

impl Default for GeolocationColumns {
    fn default() -> Self {
        Self {
            zip_prefix: "geolocation_zip_code_prefix".into(),
            lat: "geolocation_lat".into(),
            lng: "geolocation_lng".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderColumns {
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub purchase_ts: String,
    pub delivered_ts: String,
    pub estimated_delivery_ts: String,
}

impl Default for OrderColumns {
    fn default() -> Self {
        Self {
            order_id: "order_id".into(),
            customer_id: "customer_id".into(),
            status: "order_status".into(),
            purchase_ts: "order_purchase_timestamp".into(),
            delivered_ts: "order_delivered_customer_date".into(),
            estimated_delivery_ts: "order_estimated_delivery_date".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderItemColumns {
    pub order_id: String,
    pub product_id: String,
    pub price: String,
}

impl Default for OrderItemColumns {
    fn default() -> Self {
        Self {
            order_id: "order_id".into(),
            product_id: "product_id".into(),
            price: "price".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductColumns {
    pub product_id: String,
    pub category: String,
}

impl Default for ProductColumns {
    fn default() -> Self {
        Self {
            product_id: "product_id".into(),
            category: "product_category_name".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicColumns {
    pub period: String,
    pub econ_activity: String,
    pub debt: String,
    pub inflation: String,
    pub interest_rate: String,
}

impl EconomicColumns {
    /// Source column of `indicator`
    pub fn column(&self, indicator: Indicator) -> &str {
        match indicator {
            Indicator::EconActivity => &self.econ_activity,
            Indicator::Debt => &self.debt,
            Indicator::Inflation => &self.inflation,
            Indicator::InterestRate => &self.interest_rate,
        }
    }
}

impl Default for EconomicColumns {
    fn default() -> Self {
        Self {
            period: "date".into(),
            econ_activity: "econ_act".into(),
            debt: "peo_debt".into(),
            inflation: "inflation".into(),
            interest_rate: "interest_rate".into(),
        }
    }
}

/// Tuning of the warehouse allocation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Explicit cluster count; derived from the point count when absent
    pub clusters: Option<usize>,
    /// Lower bound of the derived cluster count
    pub k_floor: usize,
    /// Upper bound of the derived cluster count (the configured maximum)
    pub k_ceiling: usize,
    /// Divisor of `sqrt(points)` in the derived cluster count
    pub k_divisor: f64,
    /// Smallest cluster count used when points are scarce
    pub k_min: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    /// Number of k-means restarts; the lowest inertia wins
    pub n_runs: usize,
    pub seed: u64,
    /// Distance percentile above which members count as outliers
    pub outlier_percentile: f64,
    pub subdivision_threshold: f64,
    pub max_subclusters: usize,
    pub max_subdivision_depth: usize,
    pub large_threshold: f64,
    pub medium_threshold: f64,
    pub score_base: f64,
    pub score_max: f64,
    pub score_reference: f64,
    pub top_items: usize,
    pub top_categories: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            clusters: None,
            k_floor: 30,
            k_ceiling: 120,
            k_divisor: 15.0,
            k_min: 5,
            max_iters: 300,
            tolerance: 1e-4,
            n_runs: 10,
            seed: 42,
            outlier_percentile: 95.0,
            subdivision_threshold: 0.08,
            max_subclusters: 3,
            max_subdivision_depth: 1,
            large_threshold: 0.04,
            medium_threshold: 0.015,
            score_base: 10.0,
            score_max: 25.0,
            score_reference: 0.1,
            top_items: 5,
            top_categories: 3,
        }
    }
}

impl AllocationConfig {
    pub fn validate(&self) -> InsightResult<()> {
        if self.k_min == 0 || self.k_floor < self.k_min || self.k_ceiling < self.k_floor {
            return Err(invalid(
                "cluster bounds",
                format!(
                    "k_min={} k_floor={} k_ceiling={}",
                    self.k_min, self.k_floor, self.k_ceiling
                ),
            ));
        }
        if self.clusters == Some(0) {
            return Err(invalid("clusters", "0"));
        }
        if !(self.k_divisor > 0.0) {
            return Err(invalid("k_divisor", self.k_divisor));
        }
        if self.max_iters == 0 || self.n_runs == 0 {
            return Err(invalid(
                "iterations",
                format!("max_iters={} n_runs={}", self.max_iters, self.n_runs),
            ));
        }
        if !(0.0..=100.0).contains(&self.outlier_percentile) {
            return Err(invalid("outlier_percentile", self.outlier_percentile));
        }
        if !(self.medium_threshold >= 0.0 && self.large_threshold > self.medium_threshold) {
            return Err(invalid(
                "size thresholds",
                format!(
                    "large={} medium={}",
                    self.large_threshold, self.medium_threshold
                ),
            ));
        }
        if !(self.score_max >= self.score_base && self.score_reference > 0.0) {
            return Err(invalid(
                "improvement score",
                format!(
                    "base={} max={} reference={}",
                    self.score_base, self.score_max, self.score_reference
                ),
            ));
        }
        Ok(())
    }
}

/// Options of the metric and correlation calculator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Status value of orders kept by the cleaning step
    pub delivered_status: String,
    pub fast_percentile: f64,
    pub slow_percentile: f64,
    /// Months required before a trend is estimated
    pub min_trend_months: usize,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            delivered_status: "delivered".into(),
            fast_percentile: 25.0,
            slow_percentile: 75.0,
            min_trend_months: 3,
        }
    }
}

impl CalculatorConfig {
    pub fn validate(&self) -> InsightResult<()> {
        if !(0.0 <= self.fast_percentile
            && self.fast_percentile <= self.slow_percentile
            && self.slow_percentile <= 100.0)
        {
            return Err(invalid(
                "delivery percentiles",
                format!("fast={} slow={}", self.fast_percentile, self.slow_percentile),
            ));
        }
        if self.min_trend_months < 2 {
            return Err(invalid("min_trend_months", self.min_trend_months));
        }
        Ok(())
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema: SchemaMapping,
    pub allocation: AllocationConfig,
    pub calculator: CalculatorConfig,
}

impl Config {
    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InsightResult<()> {
        self.allocation.validate()?;
        self.calculator.validate()
    }
}

fn invalid(field: &str, value: impl ToString) -> InsightError {
    InsightError::data(format!(
        "Invalid configuration: {} = {}",
        field,
        value.to_string()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allocation.seed, 42);
        assert_eq!(config.schema.geolocation.lat, "geolocation_lat");
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let mut config = AllocationConfig::default();
        config.large_threshold = 0.01;
        config.medium_threshold = 0.02;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_clusters_rejected() {
        let config = AllocationConfig {
            clusters: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"allocation": {{"clusters": 12, "seed": 7}}, "schema": {{"economic": {{"period": "month"}}}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.allocation.clusters, Some(12));
        assert_eq!(config.allocation.seed, 7);
        assert_eq!(config.allocation.k_ceiling, 120);
        assert_eq!(config.schema.economic.period, "month");
        assert_eq!(config.schema.economic.debt, "peo_debt");
    }
}
