//! Delivery performance, general metrics and economic correlation statistics

use crate::config::CalculatorConfig;
use crate::error::{InsightError, InsightResult};
use crate::events::{EventSink, StageEvent};
use crate::records::{
    CustomerRecord, EconomicIndicatorRecord, Indicator, OrderItemRecord, OrderRecord,
    ProductRecord, YearMonth,
};
use crate::stats::{linear_slope, mean, pearson, percentile_sorted};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

/// Borrowed input tables of one calculation
#[derive(Debug, Clone, Copy)]
pub struct CalculatorInputs<'a> {
    pub customers: &'a [CustomerRecord],
    pub orders: &'a [OrderRecord],
    pub order_items: &'a [OrderItemRecord],
    pub products: &'a [ProductRecord],
    pub economic: &'a [EconomicIndicatorRecord],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralMetrics {
    pub total_customers: usize,
    pub total_items: usize,
    pub items_per_customer_avg: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryClass {
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedDistribution {
    pub fast: Option<f64>,
    pub medium: Option<f64>,
    pub slow: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Percentiles {
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDelivery {
    pub state: String,
    pub mean_days: f64,
    pub median_days: f64,
    pub orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub avg_delivery_days: Option<f64>,
    pub speed_distribution: SpeedDistribution,
    pub percentiles: Percentiles,
    /// Orders with both timestamps and a non-negative delivery time
    pub orders_analyzed: usize,
    /// Orders delivered before their purchase timestamp
    pub anomalies_excluded: usize,
    pub by_state: Vec<StateDelivery>,
}

impl DeliveryStats {
    fn empty(anomalies_excluded: usize) -> Self {
        Self {
            avg_delivery_days: None,
            speed_distribution: SpeedDistribution {
                fast: None,
                medium: None,
                slow: None,
            },
            percentiles: Percentiles {
                p25: None,
                p50: None,
                p75: None,
            },
            orders_analyzed: 0,
            anomalies_excluded,
            by_state: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NationalCorrelations {
    pub debt: Option<f64>,
    pub inflation: Option<f64>,
    pub interest_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendLabel {
    pub fn from_slope(slope: f64) -> Self {
        if slope > 0.0 {
            TrendLabel::Increasing
        } else if slope < 0.0 {
            TrendLabel::Decreasing
        } else {
            TrendLabel::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendEstimate {
    pub slope: Option<f64>,
    pub trend: Option<TrendLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyVolume {
    pub period: YearMonth,
    pub orders_count: usize,
}

/// Correlation of monthly order volume with each indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderCorrelations {
    pub econ_activity: Option<f64>,
    pub debt: Option<f64>,
    pub inflation: Option<f64>,
    pub interest_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicAnalysis {
    pub national_correlations: NationalCorrelations,
    pub trend_estimate: TrendEstimate,
    pub monthly_volumes: Vec<MonthlyVolume>,
    pub order_correlations: OrderCorrelations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub share_pct: f64,
}

/// Everything the calculator produces in one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub metrics: GeneralMetrics,
    pub delivery_stats: DeliveryStats,
    pub economic_analysis: EconomicAnalysis,
    pub inventory_distribution: Vec<CategoryShare>,
}

/// Stateless single-pass statistics over cleaned tables
pub struct MetricCalculator<'a> {
    config: &'a CalculatorConfig,
    sink: &'a dyn EventSink,
}

impl<'a> MetricCalculator<'a> {
    pub fn new(config: &'a CalculatorConfig, sink: &'a dyn EventSink) -> Self {
        Self { config, sink }
    }

    pub fn calculate(&self, inputs: CalculatorInputs<'_>) -> InsightResult<Statistics> {
        validate_identities(inputs)?;

        let started = Instant::now();
        let metrics = general_metrics(inputs.customers, inputs.order_items);
        let inventory_distribution = inventory_distribution(inputs.order_items, inputs.products);
        let delivery_stats = self.delivery_stats(inputs.orders, inputs.customers)?;
        self.sink.record(
            StageEvent::new("calculator.delivery", started.elapsed())
                .with_count("orders", inputs.orders.len())
                .with_count("orders_analyzed", delivery_stats.orders_analyzed)
                .with_count("anomalies_excluded", delivery_stats.anomalies_excluded),
        );

        let started = Instant::now();
        let economic_analysis = self.economic_analysis(inputs.orders, inputs.economic)?;
        self.sink.record(
            StageEvent::new("calculator.economic", started.elapsed())
                .with_count("indicator_rows", inputs.economic.len())
                .with_count("months", economic_analysis.monthly_volumes.len()),
        );

        Ok(Statistics {
            metrics,
            delivery_stats,
            economic_analysis,
            inventory_distribution,
        })
    }

    /// Delivery-time percentiles, speed classes and per-state summaries
    pub fn delivery_stats(
        &self,
        orders: &[OrderRecord],
        customers: &[CustomerRecord],
    ) -> InsightResult<DeliveryStats> {
        let mut anomalies = 0;
        let timed: Vec<(&OrderRecord, i64)> = orders
            .iter()
            .filter_map(|order| match (order.purchase_ts, order.delivered_ts) {
                (Some(purchase), Some(delivered)) => {
                    if delivered < purchase {
                        anomalies += 1;
                        None
                    } else {
                        Some((order, (delivered - purchase).num_days()))
                    }
                }
                _ => None,
            })
            .collect();

        if anomalies > 0 {
            warn!("Excluded {} orders delivered before purchase", anomalies);
        }
        if timed.is_empty() {
            return Ok(DeliveryStats::empty(anomalies));
        }

        let mut days: Vec<f64> = timed.iter().map(|(_, d)| *d as f64).collect();
        days.sort_by(f64::total_cmp);
        let p_fast = percentile_sorted(&days, self.config.fast_percentile)?;
        let p50 = percentile_sorted(&days, 50.0)?;
        let p_slow = percentile_sorted(&days, self.config.slow_percentile)?;

        let mut counts = [0usize; 3];
        for &d in &days {
            match classify_delivery(d, p_fast, p_slow) {
                DeliveryClass::Fast => counts[0] += 1,
                DeliveryClass::Medium => counts[1] += 1,
                DeliveryClass::Slow => counts[2] += 1,
            }
        }
        let total = days.len() as f64;

        let states: HashMap<&str, &str> = customers
            .iter()
            .filter_map(|c| c.state.as_deref().map(|s| (c.customer_id.as_str(), s)))
            .collect();
        let mut by_state: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (order, d) in &timed {
            if let Some(&state) = states.get(order.customer_id.as_str()) {
                by_state.entry(state).or_default().push(*d as f64);
            }
        }
        let by_state = by_state
            .into_iter()
            .map(|(state, mut values)| -> InsightResult<StateDelivery> {
                values.sort_by(f64::total_cmp);
                Ok(StateDelivery {
                    state: state.to_string(),
                    mean_days: mean(&values).unwrap_or_default(),
                    median_days: percentile_sorted(&values, 50.0)?,
                    orders: values.len(),
                })
            })
            .collect::<InsightResult<Vec<_>>>()?;

        debug!(
            "Delivery percentiles - p{}={}, p50={}, p{}={}",
            self.config.fast_percentile, p_fast, p50, self.config.slow_percentile, p_slow
        );

        Ok(DeliveryStats {
            avg_delivery_days: mean(&days),
            speed_distribution: SpeedDistribution {
                fast: Some(counts[0] as f64 / total),
                medium: Some(counts[1] as f64 / total),
                slow: Some(counts[2] as f64 / total),
            },
            percentiles: Percentiles {
                p25: Some(p_fast),
                p50: Some(p50),
                p75: Some(p_slow),
            },
            orders_analyzed: days.len(),
            anomalies_excluded: anomalies,
            by_state,
        })
    }

    /// Indicator correlations, monthly volumes and the order-volume trend
    pub fn economic_analysis(
        &self,
        orders: &[OrderRecord],
        economic: &[EconomicIndicatorRecord],
    ) -> InsightResult<EconomicAnalysis> {
        let national = |indicator: Indicator| {
            pearson(
                economic
                    .iter()
                    .map(|row| (row.econ_activity, row.value(indicator))),
            )
        };
        let national_correlations = NationalCorrelations {
            debt: national(Indicator::Debt),
            inflation: national(Indicator::Inflation),
            interest_rate: national(Indicator::InterestRate),
        };

        let mut monthly: BTreeMap<YearMonth, usize> = BTreeMap::new();
        for ts in orders.iter().filter_map(|o| o.purchase_ts.as_ref()) {
            *monthly.entry(YearMonth::of(ts)).or_default() += 1;
        }
        let monthly_volumes: Vec<MonthlyVolume> = monthly
            .into_iter()
            .map(|(period, orders_count)| MonthlyVolume {
                period,
                orders_count,
            })
            .collect();

        // Left join of monthly volumes to the indicator table
        let by_period: HashMap<YearMonth, &EconomicIndicatorRecord> =
            economic.iter().map(|row| (row.period, row)).collect();
        let joined: Vec<(f64, Option<&EconomicIndicatorRecord>)> = monthly_volumes
            .iter()
            .map(|m| (m.orders_count as f64, by_period.get(&m.period).copied()))
            .collect();
        let with_orders = |indicator: Indicator| {
            pearson(
                joined
                    .iter()
                    .map(|(count, row)| (Some(*count), row.and_then(|r| r.value(indicator)))),
            )
        };
        let order_correlations = OrderCorrelations {
            econ_activity: with_orders(Indicator::EconActivity),
            debt: with_orders(Indicator::Debt),
            inflation: with_orders(Indicator::Inflation),
            interest_rate: with_orders(Indicator::InterestRate),
        };

        let trend_estimate = if joined.len() < self.config.min_trend_months {
            TrendEstimate {
                slope: None,
                trend: None,
            }
        } else {
            let xs: Vec<f64> = (0..joined.len()).map(|i| i as f64).collect();
            let ys: Vec<f64> = joined.iter().map(|(count, _)| *count).collect();
            let slope = linear_slope(&xs, &ys)?;
            TrendEstimate {
                slope: Some(slope),
                trend: Some(TrendLabel::from_slope(slope)),
            }
        };

        Ok(EconomicAnalysis {
            national_correlations,
            trend_estimate,
            monthly_volumes,
            order_correlations,
        })
    }
}

/// Speed class of a delivery given the fast and slow percentile cutoffs
pub fn classify_delivery(days: f64, p_fast: f64, p_slow: f64) -> DeliveryClass {
    if days <= p_fast {
        DeliveryClass::Fast
    } else if days <= p_slow {
        DeliveryClass::Medium
    } else {
        DeliveryClass::Slow
    }
}

pub fn general_metrics(customers: &[CustomerRecord], items: &[OrderItemRecord]) -> GeneralMetrics {
    let total_customers = customers.len();
    let total_items = items.len();
    GeneralMetrics {
        total_customers,
        total_items,
        items_per_customer_avg: (total_customers > 0)
            .then(|| total_items as f64 / total_customers as f64),
    }
}

/// Share of order items per product category, largest first
pub fn inventory_distribution(items: &[OrderItemRecord], products: &[ProductRecord]) -> Vec<CategoryShare> {
    let categories: HashMap<&str, &str> = products
        .iter()
        .filter_map(|p| p.category.as_deref().map(|c| (p.product_id.as_str(), c)))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        if let Some(&category) = categories.get(item.product_id.as_str()) {
            *counts.entry(category).or_default() += 1;
        }
    }
    let total: usize = counts.values().sum();

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .map(|(category, n)| CategoryShare {
            category: category.to_string(),
            share_pct: n as f64 / total as f64 * 100.0,
        })
        .collect()
}

fn validate_identities(inputs: CalculatorInputs<'_>) -> InsightResult<()> {
    if let Some(position) = inputs
        .orders
        .iter()
        .position(|o| o.order_id.trim().is_empty() || o.customer_id.trim().is_empty())
    {
        return Err(InsightError::data(format!(
            "Order row {position} lacks an order id or customer id"
        )));
    }
    if let Some(position) = inputs
        .customers
        .iter()
        .position(|c| c.customer_id.trim().is_empty())
    {
        return Err(InsightError::data(format!(
            "Customer row {position} lacks a customer id"
        )));
    }
    Ok(())
}
