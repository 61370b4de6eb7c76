//! CSV loading and cleaning using Polars
//!
//! Every table is scanned with all columns as strings, exact duplicate rows are
//! removed, and the declared schema mapping is validated before the rows are
//! converted into typed records.

use crate::config::SchemaMapping;
use crate::error::InsightError;
use crate::records::{
    parse_timestamp, CleanedTables, CustomerRecord, EconomicIndicatorRecord, GeoPoint, Indicator,
    OrderItemRecord, OrderRecord, ProductRecord, YearMonth,
};
use anyhow::Context;
use polars::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locations of the input CSV files
#[derive(Debug, Clone, PartialEq)]
pub struct InputPaths {
    pub customers: PathBuf,
    pub geolocation: PathBuf,
    pub orders: PathBuf,
    pub order_items: PathBuf,
    pub products: PathBuf,
    /// Optional; a missing file leaves every indicator absent
    pub economic: Option<PathBuf>,
}

impl InputPaths {
    /// Default Olist file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            customers: dir.join("olist_customers_dataset.csv"),
            geolocation: dir.join("olist_geolocation_dataset.csv"),
            orders: dir.join("olist_orders_dataset.csv"),
            order_items: dir.join("olist_order_items_dataset.csv"),
            products: dir.join("olist_products_dataset.csv"),
            economic: Some(dir.join("brazil_economy_indicators.csv")),
        }
    }
}

/// Load and clean all input tables
///
/// # Arguments
/// * `paths` - Input file locations
/// * `schema` - Column names of every table
/// * `delivered_status` - Orders with any other status are dropped
///
/// # Returns
/// * `CleanedTables` with typed, deduplicated records
pub fn load_tables(
    paths: &InputPaths,
    schema: &SchemaMapping,
    delivered_status: &str,
) -> crate::Result<CleanedTables> {
    let tables = CleanedTables {
        customers: load_customers(&paths.customers, schema)?,
        geolocation: load_geolocation(&paths.geolocation, schema)?,
        orders: load_orders(&paths.orders, schema, delivered_status)?,
        order_items: load_order_items(&paths.order_items, schema)?,
        products: load_products(&paths.products, schema)?,
        economic: match &paths.economic {
            Some(path) if path.exists() => match load_economic(path, schema) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Ignoring economic indicators at {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Some(path) => {
                warn!("Economic indicators not found at {}", path.display());
                Vec::new()
            }
            None => Vec::new(),
        },
    };

    info!(
        "Loaded tables - customers={}, geolocation={}, orders={}, items={}, products={}, economic={}",
        tables.customers.len(),
        tables.geolocation.len(),
        tables.orders.len(),
        tables.order_items.len(),
        tables.products.len(),
        tables.economic.len()
    );
    Ok(tables)
}

pub fn load_customers(path: &Path, schema: &SchemaMapping) -> crate::Result<Vec<CustomerRecord>> {
    let cols = &schema.customers;
    let df = read_table(path, "customers", &[&cols.customer_id, &cols.zip_prefix])?;

    let ids = text_column(&df, &cols.customer_id)?;
    let zips = text_column(&df, &cols.zip_prefix)?;
    let states = optional_text_column(&df, &cols.state)?;

    let customers = (0..df.height())
        .filter_map(|i| {
            let state = states.as_ref().and_then(|s| s[i].clone());
            if ids[i].is_none() && zips[i].is_none() && state.is_none() {
                return None;
            }
            Some(CustomerRecord {
                customer_id: ids[i].clone().unwrap_or_default(),
                zip_prefix: zips[i].clone().unwrap_or_default(),
                state,
            })
        })
        .collect();
    Ok(customers)
}

/// Rows without a prefix or numeric coordinates cannot position anything and are dropped
pub fn load_geolocation(path: &Path, schema: &SchemaMapping) -> crate::Result<Vec<GeoPoint>> {
    let cols = &schema.geolocation;
    let df = read_table(path, "geolocation", &[&cols.zip_prefix, &cols.lat, &cols.lng])?;

    let zips = text_column(&df, &cols.zip_prefix)?;
    let lats = text_column(&df, &cols.lat)?;
    let lngs = text_column(&df, &cols.lng)?;

    let points: Vec<GeoPoint> = (0..df.height())
        .filter_map(|i| {
            Some(GeoPoint {
                zip_prefix: zips[i].clone()?,
                lat: parse_number(lats[i].as_deref())?,
                lng: parse_number(lngs[i].as_deref())?,
            })
        })
        .collect();

    let dropped = df.height() - points.len();
    if dropped > 0 {
        debug!("Dropped {} geolocation rows without usable coordinates", dropped);
    }
    Ok(points)
}

pub fn load_orders(
    path: &Path,
    schema: &SchemaMapping,
    delivered_status: &str,
) -> crate::Result<Vec<OrderRecord>> {
    let cols = &schema.orders;
    let df = read_table(
        path,
        "orders",
        &[
            &cols.order_id,
            &cols.customer_id,
            &cols.status,
            &cols.purchase_ts,
            &cols.delivered_ts,
            &cols.estimated_delivery_ts,
        ],
    )?;
    let total = df.height();

    let df = df
        .lazy()
        .filter(col(&cols.status).eq(lit(delivered_status)))
        .collect()?;
    info!("Orders filtered to '{}': {}/{}", delivered_status, df.height(), total);

    let ids = text_column(&df, &cols.order_id)?;
    let customers = text_column(&df, &cols.customer_id)?;
    let statuses = text_column(&df, &cols.status)?;
    let purchased = text_column(&df, &cols.purchase_ts)?;
    let delivered = text_column(&df, &cols.delivered_ts)?;
    let estimated = text_column(&df, &cols.estimated_delivery_ts)?;

    let orders = (0..df.height())
        .map(|i| OrderRecord {
            order_id: ids[i].clone().unwrap_or_default(),
            customer_id: customers[i].clone().unwrap_or_default(),
            status: statuses[i].clone().unwrap_or_default(),
            purchase_ts: purchased[i].as_deref().and_then(parse_timestamp),
            delivered_ts: delivered[i].as_deref().and_then(parse_timestamp),
            estimated_delivery_ts: estimated[i].as_deref().and_then(parse_timestamp),
        })
        .collect();
    Ok(orders)
}

pub fn load_order_items(path: &Path, schema: &SchemaMapping) -> crate::Result<Vec<OrderItemRecord>> {
    let cols = &schema.order_items;
    let df = read_table(path, "order_items", &[&cols.order_id, &cols.product_id, &cols.price])?;

    let orders = text_column(&df, &cols.order_id)?;
    let products = text_column(&df, &cols.product_id)?;
    let prices = text_column(&df, &cols.price)?;

    let items = (0..df.height())
        .filter(|&i| orders[i].is_some() || products[i].is_some() || prices[i].is_some())
        .map(|i| OrderItemRecord {
            order_id: orders[i].clone().unwrap_or_default(),
            product_id: products[i].clone().unwrap_or_default(),
            price: parse_number(prices[i].as_deref()),
        })
        .collect();
    Ok(items)
}

pub fn load_products(path: &Path, schema: &SchemaMapping) -> crate::Result<Vec<ProductRecord>> {
    let cols = &schema.products;
    let df = read_table(path, "products", &[&cols.product_id, &cols.category])?;

    let ids = text_column(&df, &cols.product_id)?;
    let categories = text_column(&df, &cols.category)?;

    let products = (0..df.height())
        .filter(|&i| ids[i].is_some() || categories[i].is_some())
        .map(|i| ProductRecord {
            product_id: ids[i].clone().unwrap_or_default(),
            category: categories[i].clone(),
        })
        .collect();
    Ok(products)
}

/// Indicator columns that are missing or contain non-numeric cells become absent
pub fn load_economic(path: &Path, schema: &SchemaMapping) -> crate::Result<Vec<EconomicIndicatorRecord>> {
    let cols = &schema.economic;
    let df = read_table(path, "economic_indicators", &[&cols.period])?;

    let periods = text_column(&df, &cols.period)?;
    let mut columns = Vec::with_capacity(Indicator::ALL.len());
    for indicator in Indicator::ALL {
        columns.push(indicator_column(&df, indicator, cols.column(indicator))?);
    }
    let value = |indicator: Indicator, i: usize| {
        columns[indicator as usize].as_ref().and_then(|c| c[i])
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for i in 0..df.height() {
        let Some(period) = periods[i].as_deref().and_then(|p| p.parse::<YearMonth>().ok()) else {
            warn!("Skipping economic row {} with unparseable period {:?}", i, periods[i]);
            continue;
        };
        if !seen.insert(period) {
            warn!("Duplicate economic period {}; keeping the first row", period);
            continue;
        }
        records.push(EconomicIndicatorRecord {
            period,
            econ_activity: value(Indicator::EconActivity, i),
            debt: value(Indicator::Debt, i),
            inflation: value(Indicator::Inflation, i),
            interest_rate: value(Indicator::InterestRate, i),
        });
    }
    records.sort_by_key(|r| r.period);
    Ok(records)
}

/// Scan a CSV as strings, drop exact duplicates and check the required columns
fn read_table(path: &Path, table: &str, required: &[&String]) -> crate::Result<DataFrame> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("Cannot open {} table at {}", table, path.display()))?
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()
        .with_context(|| format!("Cannot read {} table at {}", table, path.display()))?;

    for column in required {
        if df.column(column.as_str()).is_err() {
            return Err(InsightError::data(format!(
                "{} table is missing required column '{}'",
                table, column
            ))
            .into());
        }
    }
    debug!("Read {} rows from {}", df.height(), path.display());
    Ok(df)
}

/// Trimmed cell values; empty cells become `None`
fn text_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let values = df
        .column(name)?
        .str()?
        .into_iter()
        .map(|cell| {
            cell.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

fn optional_text_column(df: &DataFrame, name: &str) -> crate::Result<Option<Vec<Option<String>>>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    text_column(df, name).map(Some)
}

fn indicator_column(
    df: &DataFrame,
    indicator: Indicator,
    name: &str,
) -> crate::Result<Option<Vec<Option<f64>>>> {
    let Some(cells) = optional_text_column(df, name)? else {
        warn!("Indicator {} is absent (no column '{}')", indicator.name(), name);
        return Ok(None);
    };

    let mut values = Vec::with_capacity(cells.len());
    for cell in &cells {
        match cell.as_deref() {
            None => values.push(None),
            Some(raw) => match parse_number(Some(raw)) {
                Some(v) => values.push(Some(v)),
                None => {
                    warn!(
                        "Indicator {} is non-numeric in column '{}' ({:?})",
                        indicator.name(),
                        name,
                        raw
                    );
                    return Ok(None);
                }
            },
        }
    }
    Ok(Some(values))
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_csv(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_load_customers_drops_duplicates() {
        let file = create_csv(&[
            "customer_id,customer_unique_id,customer_zip_code_prefix,customer_city,customer_state",
            "c1,u1,01001,sao paulo,SP",
            "c1,u1,01001,sao paulo,SP",
            "c2,u2,20010,rio de janeiro,RJ",
            ",,,,",
        ]);

        let customers = load_customers(file.path(), &SchemaMapping::default()).unwrap();
        assert_eq!(customers.len(), 2);
        assert_eq!(customers[0].customer_id, "c1");
        assert_eq!(customers[0].zip_prefix, "01001");
        assert_eq!(customers[1].state.as_deref(), Some("RJ"));
    }

    #[test]
    fn test_missing_required_column_is_data_error() {
        let file = create_csv(&["customer_id,customer_city", "c1,sao paulo"]);

        let err = load_customers(file.path(), &SchemaMapping::default()).unwrap_err();
        let insight = err.downcast_ref::<InsightError>().unwrap();
        assert_eq!(insight.kind(), "DataError");
        assert!(insight.to_string().contains("customer_zip_code_prefix"));
    }

    #[test]
    fn test_load_geolocation_skips_invalid_coordinates() {
        let file = create_csv(&[
            "geolocation_zip_code_prefix,geolocation_lat,geolocation_lng,geolocation_city",
            "01001,-23.55,-46.63,sao paulo",
            "01002,not-a-number,-46.63,sao paulo",
            "01003,,-46.64,sao paulo",
        ]);

        let points = load_geolocation(file.path(), &SchemaMapping::default()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].zip_prefix, "01001");
        assert!((points[0].lat + 23.55).abs() < 1e-12);
    }

    #[test]
    fn test_load_orders_filters_status_and_keeps_bad_timestamps() {
        let file = create_csv(&[
            "order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_carrier_date,order_delivered_customer_date,order_estimated_delivery_date",
            "o1,c1,delivered,2017-10-02 10:56:33,,,2017-10-10 21:25:13,2017-10-18 00:00:00",
            "o2,c2,canceled,2017-10-03 10:56:33,,,,2017-10-18 00:00:00",
            "o3,c3,delivered,2017-10-04 10:56:33,,,someday,2017-10-18 00:00:00",
        ]);

        let orders = load_orders(file.path(), &SchemaMapping::default(), "delivered").unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].delivered_ts.is_some());
        assert_eq!(orders[1].order_id, "o3");
        assert!(orders[1].purchase_ts.is_some());
        assert_eq!(orders[1].delivered_ts, None);
    }

    #[test]
    fn test_load_economic_marks_non_numeric_column_absent() {
        let file = create_csv(&[
            "date,econ_act,peo_debt,inflation",
            "2017-01-01,100.0,high,0.5",
            "2017-02-01,101.5,low,0.4",
            "2017-02-15,999.0,low,0.1",
            "bad-date,1.0,1.0,1.0",
        ]);

        let records = load_economic(file.path(), &SchemaMapping::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].period.to_string(), "2017-01");
        assert_eq!(records[1].econ_activity, Some(101.5));
        assert!(records.iter().all(|r| r.debt.is_none()));
        assert!(records.iter().all(|r| r.interest_rate.is_none()));
        assert_eq!(records[0].inflation, Some(0.5));
    }

    #[test]
    fn test_load_tables_without_economic_file() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, lines: &[&str]| {
            std::fs::write(dir.path().join(name), lines.join("\n") + "\n").unwrap();
        };
        write(
            "olist_customers_dataset.csv",
            &["customer_id,customer_zip_code_prefix", "c1,01001"],
        );
        write(
            "olist_geolocation_dataset.csv",
            &["geolocation_zip_code_prefix,geolocation_lat,geolocation_lng", "01001,-23.5,-46.6"],
        );
        write(
            "olist_orders_dataset.csv",
            &[
                "order_id,customer_id,order_status,order_purchase_timestamp,order_delivered_customer_date,order_estimated_delivery_date",
                "o1,c1,delivered,2018-01-01 10:00:00,2018-01-05 10:00:00,2018-01-10 00:00:00",
            ],
        );
        write("olist_order_items_dataset.csv", &["order_id,product_id,price", "o1,p1,10.5"]);
        write(
            "olist_products_dataset.csv",
            &["product_id,product_category_name", "p1,toys"],
        );

        let tables = load_tables(
            &InputPaths::in_dir(dir.path()),
            &SchemaMapping::default(),
            "delivered",
        )
        .unwrap();
        assert_eq!(tables.customers.len(), 1);
        assert_eq!(tables.order_items[0].price, Some(10.5));
        assert_eq!(tables.products[0].category.as_deref(), Some("toys"));
        assert!(tables.economic.is_empty());

        // An unreadable economic table leaves the indicators empty instead of failing
        write("brazil_economy_indicators.csv", &["month,econ_act", "2018-01,100.0"]);
        let tables = load_tables(
            &InputPaths::in_dir(dir.path()),
            &SchemaMapping::default(),
            "delivered",
        )
        .unwrap();
        assert!(tables.economic.is_empty());
        assert_eq!(tables.orders.len(), 1);
    }
}
