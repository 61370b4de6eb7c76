//! Typed, cleaned input tables consumed by the analytical core

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A customer and the postal prefix used to position it
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub zip_prefix: String,
    pub state: Option<String>,
}

/// Coordinates of a postal prefix
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub zip_prefix: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub purchase_ts: Option<NaiveDateTime>,
    pub delivered_ts: Option<NaiveDateTime>,
    pub estimated_delivery_ts: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItemRecord {
    pub order_id: String,
    pub product_id: String,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub product_id: String,
    pub category: Option<String>,
}

/// Calendar month, the key of the economic table and of monthly order volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(YearMonth { year, month })
    }

    pub fn of(ts: &NaiveDateTime) -> Self {
        YearMonth {
            year: ts.year(),
            month: ts.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    /// Accepts `YYYY-MM`, `YYYY-MM-DD` and full timestamps
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(ts) = parse_timestamp(s) {
            return Ok(YearMonth::of(&ts));
        }
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid period: {s}"))?;
        let year: i32 = year.parse().map_err(|_| format!("Invalid period year: {s}"))?;
        let month: u32 = month.parse().map_err(|_| format!("Invalid period month: {s}"))?;
        YearMonth::new(year, month).ok_or_else(|| format!("Invalid period month: {s}"))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Indicator columns of the economic table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    EconActivity,
    Debt,
    Inflation,
    InterestRate,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::EconActivity,
        Indicator::Debt,
        Indicator::Inflation,
        Indicator::InterestRate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Indicator::EconActivity => "econ_activity",
            Indicator::Debt => "debt",
            Indicator::Inflation => "inflation",
            Indicator::InterestRate => "interest_rate",
        }
    }
}

/// One month of macroeconomic indicators.
///
/// An indicator that is absent from the source, or non-numeric, is `None` on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct EconomicIndicatorRecord {
    pub period: YearMonth,
    pub econ_activity: Option<f64>,
    pub debt: Option<f64>,
    pub inflation: Option<f64>,
    pub interest_rate: Option<f64>,
}

impl EconomicIndicatorRecord {
    pub fn value(&self, indicator: Indicator) -> Option<f64> {
        match indicator {
            Indicator::EconActivity => self.econ_activity,
            Indicator::Debt => self.debt,
            Indicator::Inflation => self.inflation,
            Indicator::InterestRate => self.interest_rate,
        }
    }
}

/// All cleaned tables of one run
#[derive(Debug, Clone, Default)]
pub struct CleanedTables {
    pub customers: Vec<CustomerRecord>,
    pub geolocation: Vec<GeoPoint>,
    pub orders: Vec<OrderRecord>,
    pub order_items: Vec<OrderItemRecord>,
    pub products: Vec<ProductRecord>,
    pub economic: Vec<EconomicIndicatorRecord>,
}

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a timestamp cell; anything unparseable becomes `None`
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
