//! Warehouse allocation: geographic clustering of customers, outlier trimming,
//! adaptive subdivision of dense clusters and facility sizing.

use crate::config::AllocationConfig;
use crate::error::{InsightError, InsightResult};
use crate::events::{EventSink, StageEvent};
use crate::model::{euclidean_distance, fit_kmeans, KMeansModel, KMeansParams};
use crate::records::{CustomerRecord, GeoPoint, OrderItemRecord, OrderRecord, ProductRecord};
use crate::stats::percentile;
use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, info};

/// Borrowed input tables of one allocation run
#[derive(Debug, Clone, Copy)]
pub struct AllocationInputs<'a> {
    pub customers: &'a [CustomerRecord],
    pub geolocation: &'a [GeoPoint],
    /// Delivered orders only
    pub orders: &'a [OrderRecord],
    pub order_items: &'a [OrderItemRecord],
    pub products: &'a [ProductRecord],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

/// Recommended facility location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseCandidate {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub customer_count: usize,
    pub density_ratio: f64,
    pub size_class: SizeClass,
    pub improvement_score: f64,
    pub top_items: Vec<String>,
    pub top_categories: Vec<String>,
    pub note: Option<String>,
}

/// Audit record of one processed cluster or sub-cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterLog {
    pub cluster_id: String,
    pub member_count: usize,
    pub centroid: [f64; 2],
    pub density_ratio: f64,
    pub outliers_removed: usize,
    pub subcluster_count: usize,
}

/// Output of the allocation engine
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub candidates: Vec<WarehouseCandidate>,
    pub cluster_logs: Vec<ClusterLog>,
    /// Number of top-level clusters
    pub n_clusters: usize,
    pub total_clustered_customers: usize,
    pub total_outliers: usize,
}

/// A customer positioned at its postal prefix
#[derive(Debug, Clone)]
struct PlacedCustomer<'a> {
    customer_id: &'a str,
    point: [f64; 2],
}

/// Products bought by each customer, with their category
type Purchases<'a> = HashMap<&'a str, Vec<(&'a str, Option<&'a str>)>>;

/// Pending cluster on the subdivision worklist
#[derive(Debug)]
struct ClusterTask {
    path: Vec<usize>,
    members: Vec<usize>,
    depth: usize,
}

/// Clusters customers and promotes clusters to warehouse candidates
pub struct WarehouseAllocator<'a> {
    config: &'a AllocationConfig,
    sink: &'a dyn EventSink,
}

impl<'a> WarehouseAllocator<'a> {
    pub fn new(config: &'a AllocationConfig, sink: &'a dyn EventSink) -> Self {
        Self { config, sink }
    }

    /// Run the full allocation
    ///
    /// # Returns
    /// * Ordered candidates with a parallel audit log; a data error when no
    ///   customer has valid coordinates or none could be attached to a cluster
    pub fn allocate(&self, inputs: AllocationInputs<'_>) -> InsightResult<Allocation> {
        // 1. Position customers
        let started = Instant::now();
        let placed = place_customers(inputs.customers, inputs.geolocation)?;
        let distinct = distinct_points(&placed);
        self.sink.record(
            StageEvent::new("allocation.geo_join", started.elapsed())
                .with_count("customers", inputs.customers.len())
                .with_count("placed", placed.len())
                .with_count("distinct_points", distinct),
        );

        // 2-3. Cluster
        let started = Instant::now();
        let k = resolve_cluster_count(self.config, placed.len(), distinct);
        let all_rows: Vec<usize> = (0..placed.len()).collect();
        let model = self.cluster(&placed, &all_rows, k)?;
        info!(
            "Clustered {} customers into {} clusters (inertia {:.4})",
            placed.len(),
            k,
            model.inertia
        );
        debug!("Top-level cluster sizes: {:?}", model.cluster_sizes());
        self.sink.record(
            StageEvent::new("allocation.kmeans", started.elapsed())
                .with_count("clusters", k)
                .with_count("points", placed.len()),
        );

        // 4. Attribute purchases
        let started = Instant::now();
        let purchases = attribute_purchases(inputs);
        let attached: usize = placed
            .iter()
            .filter_map(|c| purchases.get(c.customer_id))
            .map(Vec::len)
            .sum();
        if attached == 0 {
            return Err(InsightError::data(
                "No delivered order item could be attached to a clustered customer",
            ));
        }
        self.sink.record(
            StageEvent::new("allocation.purchase_join", started.elapsed())
                .with_count("buying_customers", purchases.len())
                .with_count("items_attached", attached),
        );

        // 5-10. Process clusters through the subdivision worklist
        let started = Instant::now();
        let mut stack: Vec<ClusterTask> = (0..model.n_clusters)
            .rev()
            .map(|cluster| ClusterTask {
                path: vec![cluster + 1],
                members: model.members(cluster),
                depth: 0,
            })
            .filter(|task| !task.members.is_empty())
            .collect();

        let total = placed.len();
        let mut candidates: Vec<(Vec<usize>, WarehouseCandidate)> = Vec::new();
        let mut logs: Vec<(Vec<usize>, ClusterLog)> = Vec::new();
        let mut total_outliers = 0;
        let mut splits = 0;

        while let Some(task) = stack.pop() {
            let centroid = centroid_of(&placed, &task.members);
            let kept = trim_outliers(&placed, &task.members, centroid, self.config.outlier_percentile)?;
            let outliers = task.members.len() - kept.len();
            let density_ratio = kept.len() as f64 / total as f64;
            total_outliers += outliers;

            let sub_k = self.subcluster_count(&placed, &kept, density_ratio, task.depth);
            let mut children = Vec::new();
            if sub_k >= 2 {
                let sub_model = self.cluster(&placed, &kept, sub_k)?;
                children = (0..sub_model.n_clusters)
                    .map(|sub| {
                        sub_model
                            .members(sub)
                            .into_iter()
                            .map(|local| kept[local])
                            .collect::<Vec<_>>()
                    })
                    .filter(|members| !members.is_empty())
                    .collect();
            }

            let cluster_id = path_id(&task.path);
            debug!(
                "Cluster {} - members={}, outliers={}, density={:.4}, subclusters={}",
                cluster_id,
                task.members.len(),
                outliers,
                density_ratio,
                children.len()
            );
            logs.push((
                task.path.clone(),
                ClusterLog {
                    cluster_id: cluster_id.clone(),
                    member_count: task.members.len(),
                    centroid,
                    density_ratio,
                    outliers_removed: outliers,
                    subcluster_count: children.len(),
                },
            ));

            if children.is_empty() {
                let note = (task.depth > 0).then(|| {
                    format!(
                        "Metropolitan split of cluster {}",
                        path_id(&task.path[..task.path.len() - 1])
                    )
                });
                let candidate = self.candidate(
                    cluster_id,
                    centroid,
                    kept.len(),
                    density_ratio,
                    &task.members,
                    &placed,
                    &purchases,
                    note,
                );
                candidates.push((task.path, candidate));
            } else {
                splits += 1;
                for (index, members) in children.into_iter().enumerate().rev() {
                    let mut path = task.path.clone();
                    path.push(index + 1);
                    stack.push(ClusterTask {
                        path,
                        members,
                        depth: task.depth + 1,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        logs.sort_by(|a, b| a.0.cmp(&b.0));
        self.sink.record(
            StageEvent::new("allocation.clusters", started.elapsed())
                .with_count("candidates", candidates.len())
                .with_count("clusters_processed", logs.len())
                .with_count("outliers", total_outliers)
                .with_count("metropolitan_splits", splits),
        );

        Ok(Allocation {
            candidates: candidates.into_iter().map(|(_, c)| c).collect(),
            cluster_logs: logs.into_iter().map(|(_, l)| l).collect(),
            n_clusters: k,
            total_clustered_customers: total,
            total_outliers,
        })
    }

    fn cluster(&self, placed: &[PlacedCustomer<'_>], rows: &[usize], k: usize) -> InsightResult<KMeansModel> {
        let mut points = Array2::<f64>::zeros((rows.len(), 2));
        for (i, &row) in rows.iter().enumerate() {
            points[[i, 0]] = placed[row].point[0];
            points[[i, 1]] = placed[row].point[1];
        }
        fit_kmeans(
            &points,
            &KMeansParams {
                n_clusters: k,
                max_iters: self.config.max_iters,
                tolerance: self.config.tolerance,
                n_runs: self.config.n_runs,
                seed: self.config.seed,
            },
        )
    }

    /// Sub-cluster count for a dense cluster; below 2 means no split
    fn subcluster_count(
        &self,
        placed: &[PlacedCustomer<'_>],
        kept: &[usize],
        density_ratio: f64,
        depth: usize,
    ) -> usize {
        if depth >= self.config.max_subdivision_depth
            || density_ratio <= self.config.subdivision_threshold
        {
            return 0;
        }
        let requested = ((density_ratio * 100.0).round() as usize).min(self.config.max_subclusters);
        let distinct = distinct_points_of(placed, kept);
        requested.min(distinct)
    }

    #[allow(clippy::too_many_arguments)]
    fn candidate(
        &self,
        id: String,
        centroid: [f64; 2],
        customer_count: usize,
        density_ratio: f64,
        members: &[usize],
        placed: &[PlacedCustomer<'_>],
        purchases: &Purchases<'_>,
        note: Option<String>,
    ) -> WarehouseCandidate {
        let mut items: HashMap<&str, usize> = HashMap::new();
        let mut categories: HashMap<&str, usize> = HashMap::new();
        for &row in members {
            for &(product, category) in purchases.get(placed[row].customer_id).into_iter().flatten() {
                *items.entry(product).or_default() += 1;
                if let Some(category) = category {
                    *categories.entry(category).or_default() += 1;
                }
            }
        }

        WarehouseCandidate {
            id,
            latitude: centroid[0],
            longitude: centroid[1],
            customer_count,
            density_ratio,
            size_class: classify_size(density_ratio, self.config),
            improvement_score: improvement_score(density_ratio, self.config),
            top_items: most_frequent(items, self.config.top_items),
            top_categories: most_frequent(categories, self.config.top_categories),
            note,
        }
    }
}

/// Cluster count for `n_points` customers spread over `distinct` locations.
///
/// Derived as `max(k_floor, min(k_ceiling, sqrt(n)/k_divisor))` unless given
/// explicitly, shrunk to `max(k_min, distinct/2)` when locations are scarce and
/// never above the distinct location count.
pub fn resolve_cluster_count(config: &AllocationConfig, n_points: usize, distinct: usize) -> usize {
    let mut k = match config.clusters {
        Some(k) => k.min(config.k_ceiling),
        None => {
            let heuristic = ((n_points as f64).sqrt() / config.k_divisor).floor() as usize;
            heuristic.min(config.k_ceiling).max(config.k_floor)
        }
    };
    if distinct < k {
        k = config.k_min.max(distinct / 2);
    }
    k.min(distinct).max(1)
}

pub fn classify_size(density_ratio: f64, config: &AllocationConfig) -> SizeClass {
    if density_ratio > config.large_threshold {
        SizeClass::Large
    } else if density_ratio > config.medium_threshold {
        SizeClass::Medium
    } else {
        SizeClass::Small
    }
}

/// Expected service improvement, growing with density up to the reference ratio
pub fn improvement_score(density_ratio: f64, config: &AllocationConfig) -> f64 {
    let scale = (density_ratio / config.score_reference).clamp(0.0, 1.0);
    (config.score_base + (config.score_max - config.score_base) * scale)
        .clamp(config.score_base, config.score_max)
}

/// Left join customers to prefix coordinates, dropping unpositioned customers.
///
/// Geolocation rows sharing a prefix collapse to their mean coordinate.
fn place_customers<'a>(
    customers: &'a [CustomerRecord],
    geolocation: &[GeoPoint],
) -> InsightResult<Vec<PlacedCustomer<'a>>> {
    let mut sums: BTreeMap<&str, (f64, f64, usize)> = BTreeMap::new();
    for geo in geolocation {
        if geo.lat.is_finite() && geo.lng.is_finite() {
            let entry = sums.entry(geo.zip_prefix.as_str()).or_insert((0.0, 0.0, 0));
            entry.0 += geo.lat;
            entry.1 += geo.lng;
            entry.2 += 1;
        }
    }

    let placed: Vec<PlacedCustomer<'a>> = customers
        .iter()
        .filter_map(|customer| {
            sums.get(customer.zip_prefix.as_str())
                .map(|&(lat, lng, n)| PlacedCustomer {
                    customer_id: customer.customer_id.as_str(),
                    point: [lat / n as f64, lng / n as f64],
                })
        })
        .collect();

    if placed.is_empty() {
        return Err(InsightError::data(
            "No valid customer coordinates remain after the geographic join",
        ));
    }
    Ok(placed)
}

/// Orders → items → products, keyed by the ordering customer
fn attribute_purchases<'a>(inputs: AllocationInputs<'a>) -> Purchases<'a> {
    let order_customer: HashMap<&str, &str> = inputs
        .orders
        .iter()
        .map(|o| (o.order_id.as_str(), o.customer_id.as_str()))
        .collect();
    let categories: HashMap<&str, Option<&str>> = inputs
        .products
        .iter()
        .map(|p| (p.product_id.as_str(), p.category.as_deref()))
        .collect();

    let mut purchases: Purchases<'a> = HashMap::new();
    for item in inputs.order_items {
        if let Some(customer) = order_customer.get(item.order_id.as_str()) {
            let category = categories.get(item.product_id.as_str()).copied().flatten();
            purchases
                .entry(*customer)
                .or_default()
                .push((item.product_id.as_str(), category));
        }
    }
    purchases
}

fn point_key(point: &[f64; 2]) -> (u64, u64) {
    (point[0].to_bits(), point[1].to_bits())
}

fn distinct_points(placed: &[PlacedCustomer<'_>]) -> usize {
    placed
        .iter()
        .map(|c| point_key(&c.point))
        .collect::<BTreeSet<_>>()
        .len()
}

fn distinct_points_of(placed: &[PlacedCustomer<'_>], rows: &[usize]) -> usize {
    rows.iter()
        .map(|&row| point_key(&placed[row].point))
        .collect::<BTreeSet<_>>()
        .len()
}

fn centroid_of(placed: &[PlacedCustomer<'_>], rows: &[usize]) -> [f64; 2] {
    let n = rows.len() as f64;
    let (lat, lng) = rows.iter().fold((0.0, 0.0), |(lat, lng), &row| {
        (lat + placed[row].point[0], lng + placed[row].point[1])
    });
    [lat / n, lng / n]
}

/// Members within the distance percentile of the centroid; the rest are outliers
fn trim_outliers(
    placed: &[PlacedCustomer<'_>],
    members: &[usize],
    centroid: [f64; 2],
    outlier_percentile: f64,
) -> InsightResult<Vec<usize>> {
    let center = ArrayView1::from(&centroid[..]);
    let distances: Vec<f64> = members
        .iter()
        .map(|&row| euclidean_distance(&ArrayView1::from(&placed[row].point[..]), &center))
        .collect();
    let cutoff = percentile(&distances, outlier_percentile)?;
    // Equal distances may differ by rounding; only clear excess counts as outlying
    let max_distance = distances.iter().copied().fold(0.0, f64::max);
    let cutoff = cutoff + 1e-9 * max_distance.max(1.0);

    Ok(members
        .iter()
        .zip(distances.iter())
        .filter(|&(_, &distance)| distance <= cutoff)
        .map(|(&row, _)| row)
        .collect())
}

/// Keys sorted by descending count, ties by key
fn most_frequent(counts: HashMap<&str, usize>, limit: usize) -> Vec<String> {
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(key, _)| key.to_string())
        .collect()
}

fn path_id(path: &[usize]) -> String {
    path.iter()
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    fn customer(id: &str, zip: &str) -> CustomerRecord {
        CustomerRecord {
            customer_id: id.to_string(),
            zip_prefix: zip.to_string(),
            state: None,
        }
    }

    fn geo(zip: &str, lat: f64, lng: f64) -> GeoPoint {
        GeoPoint {
            zip_prefix: zip.to_string(),
            lat,
            lng,
        }
    }

    fn order(order_id: &str, customer_id: &str) -> OrderRecord {
        OrderRecord {
            order_id: order_id.to_string(),
            customer_id: customer_id.to_string(),
            status: "delivered".to_string(),
            purchase_ts: None,
            delivered_ts: None,
            estimated_delivery_ts: None,
        }
    }

    fn item(order_id: &str, product_id: &str) -> OrderItemRecord {
        OrderItemRecord {
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            price: Some(10.0),
        }
    }

    fn config_with_k(k: usize) -> AllocationConfig {
        AllocationConfig {
            clusters: Some(k),
            ..Default::default()
        }
    }

    struct Fixture {
        customers: Vec<CustomerRecord>,
        geolocation: Vec<GeoPoint>,
        orders: Vec<OrderRecord>,
        items: Vec<OrderItemRecord>,
        products: Vec<ProductRecord>,
    }

    impl Fixture {
        fn inputs(&self) -> AllocationInputs<'_> {
            AllocationInputs {
                customers: &self.customers,
                geolocation: &self.geolocation,
                orders: &self.orders,
                order_items: &self.items,
                products: &self.products,
            }
        }
    }

    /// 10 customers in one Sao Paulo prefix, 2 in one Rio prefix
    fn two_city_fixture() -> Fixture {
        let mut customers: Vec<CustomerRecord> =
            (0..10).map(|i| customer(&format!("sp{i}"), "01001")).collect();
        customers.push(customer("rj0", "20010"));
        customers.push(customer("rj1", "20010"));

        let orders = vec![order("o1", "sp0"), order("o2", "sp1"), order("o3", "rj0")];
        let items = vec![
            item("o1", "p_shoes"),
            item("o1", "p_watch"),
            item("o2", "p_shoes"),
            item("o3", "p_book"),
        ];
        let products = vec![
            ProductRecord {
                product_id: "p_shoes".into(),
                category: Some("fashion".into()),
            },
            ProductRecord {
                product_id: "p_book".into(),
                category: None,
            },
        ];

        Fixture {
            customers,
            geolocation: vec![
                geo("01001", -23.50, -46.60),
                geo("01001", -23.50, -46.60),
                geo("20010", -22.90, -43.20),
            ],
            orders,
            items,
            products,
        }
    }

    /// Customers spread over a grid of distinct prefixes around a center
    fn grid_fixture(center: (f64, f64), side: usize, step: f64, prefix: &str) -> Fixture {
        let mut customers = Vec::new();
        let mut geolocation = Vec::new();
        let mut orders = Vec::new();
        let mut items = Vec::new();
        for i in 0..side {
            for j in 0..side {
                let zip = format!("{prefix}{i:02}{j:02}");
                let id = format!("c{prefix}{i}_{j}");
                orders.push(order(&format!("o{id}"), &id));
                items.push(item(&format!("o{id}"), &format!("p{i}")));
                customers.push(customer(&id, &zip));
                geolocation.push(geo(
                    &zip,
                    center.0 + i as f64 * step,
                    center.1 + j as f64 * step,
                ));
            }
        }
        Fixture {
            customers,
            geolocation,
            orders,
            items,
            products: Vec::new(),
        }
    }

    #[test]
    fn test_two_city_scenario() {
        let fixture = two_city_fixture();
        let config = config_with_k(2);
        let sink = MemorySink::new();
        let allocation = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap();

        assert_eq!(allocation.candidates.len(), 2);
        let larger = allocation
            .candidates
            .iter()
            .max_by_key(|c| c.customer_count)
            .unwrap();
        assert_eq!(larger.customer_count, 10);
        assert!((larger.density_ratio - 10.0 / 12.0).abs() < 1e-9);
        assert!((larger.latitude - (-23.5)).abs() < 1e-9);
        assert_eq!(larger.size_class, SizeClass::Large);
        assert_eq!(larger.top_items, vec!["p_shoes", "p_watch"]);
        assert_eq!(larger.top_categories, vec!["fashion"]);
        assert_eq!(larger.note, None);

        let smaller = allocation
            .candidates
            .iter()
            .min_by_key(|c| c.customer_count)
            .unwrap();
        assert_eq!(smaller.customer_count, 2);
        assert_eq!(smaller.top_items, vec!["p_book"]);
        assert!(smaller.top_categories.is_empty());

        assert_eq!(allocation.cluster_logs.len(), 2);
        assert!(allocation
            .cluster_logs
            .iter()
            .all(|log| log.subcluster_count == 0 && log.outliers_removed == 0));
        assert_eq!(
            sink.stages(),
            vec![
                "allocation.geo_join",
                "allocation.kmeans",
                "allocation.purchase_join",
                "allocation.clusters"
            ]
        );
    }

    #[test]
    fn test_no_coordinates_is_data_error() {
        let mut fixture = two_city_fixture();
        fixture.geolocation = vec![geo("99999", -10.0, -40.0), geo("01001", f64::NAN, -46.6)];
        let config = config_with_k(2);
        let sink = MemorySink::new();

        let err = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap_err();
        assert_eq!(err.kind(), "DataError");
    }

    #[test]
    fn test_no_attached_purchases_is_data_error() {
        let mut fixture = two_city_fixture();
        fixture.items.clear();
        let config = config_with_k(2);
        let sink = MemorySink::new();

        let err = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap_err();
        assert_eq!(err.kind(), "DataError");
        assert!(err.to_string().contains("attached"));
    }

    #[test]
    fn test_symmetric_pair_keeps_both_members() {
        let placed = vec![
            PlacedCustomer {
                customer_id: "rj0",
                point: [-22.9, -43.2],
            },
            PlacedCustomer {
                customer_id: "rj1",
                point: [-22.899, -43.2],
            },
        ];
        let members = vec![0, 1];
        let centroid = centroid_of(&placed, &members);

        let kept = trim_outliers(&placed, &members, centroid, 95.0).unwrap();
        assert_eq!(kept, vec![0, 1]);
    }

    #[test]
    fn test_near_coincident_cities_keep_full_counts() {
        // Distinct but tight points in both cities
        let mut fixture = two_city_fixture();
        fixture.customers.truncate(10);
        fixture.geolocation.clear();
        for (i, customer) in fixture.customers.iter_mut().enumerate() {
            customer.zip_prefix = format!("01{i:03}");
            fixture
                .geolocation
                .push(geo(&customer.zip_prefix, -23.5 + i as f64 * 1e-4, -46.6 - i as f64 * 1e-4));
        }
        fixture.customers.push(customer("rj0", "20010"));
        fixture.customers.push(customer("rj1", "20011"));
        fixture.geolocation.push(geo("20010", -22.9, -43.2));
        fixture.geolocation.push(geo("20011", -22.899, -43.2));

        let config = AllocationConfig {
            clusters: Some(2),
            max_subdivision_depth: 0,
            ..Default::default()
        };
        let sink = MemorySink::new();
        let allocation = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap();

        assert_eq!(allocation.candidates.len(), 2);
        let rio = allocation
            .candidates
            .iter()
            .find(|c| c.latitude > -23.0)
            .unwrap();
        assert_eq!(rio.customer_count, 2);
        let rio_log = allocation
            .cluster_logs
            .iter()
            .find(|log| log.centroid[0] > -23.0)
            .unwrap();
        assert_eq!(rio_log.outliers_removed, 0);
    }

    #[test]
    fn test_dense_cluster_is_subdivided() {
        let fixture = grid_fixture((-23.6, -46.7), 6, 0.02, "0");
        let config = config_with_k(1);
        let sink = MemorySink::new();
        let allocation = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap();

        // The single parent is replaced by three metropolitan children
        assert_eq!(allocation.candidates.len(), 3);
        for (i, candidate) in allocation.candidates.iter().enumerate() {
            assert_eq!(candidate.id, format!("1_{}", i + 1));
            assert_eq!(candidate.note.as_deref(), Some("Metropolitan split of cluster 1"));
        }

        let parent = &allocation.cluster_logs[0];
        assert_eq!(parent.cluster_id, "1");
        assert_eq!(parent.member_count, 36);
        assert_eq!(parent.subcluster_count, 3);
        assert_eq!(allocation.cluster_logs.len(), 4);
        assert_eq!(
            allocation.cluster_logs[1..]
                .iter()
                .map(|log| log.member_count)
                .sum::<usize>(),
            36 - parent.outliers_removed
        );
    }

    #[test]
    fn test_customer_count_conservation() {
        let mut fixture = grid_fixture((-23.6, -46.7), 5, 0.05, "0");
        let far = grid_fixture((-3.7, -38.5), 3, 0.1, "6");
        fixture.customers.extend(far.customers);
        fixture.geolocation.extend(far.geolocation);

        let config = config_with_k(4);
        let sink = MemorySink::new();
        let allocation = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap();

        let reported: usize = allocation.candidates.iter().map(|c| c.customer_count).sum();
        let logged_outliers: usize = allocation
            .cluster_logs
            .iter()
            .map(|log| log.outliers_removed)
            .sum();
        assert_eq!(allocation.total_clustered_customers, 34);
        assert_eq!(logged_outliers, allocation.total_outliers);
        assert_eq!(reported, 34 - allocation.total_outliers);

        for candidate in &allocation.candidates {
            assert!(candidate.customer_count > 0);
            assert!((0.0..=1.0).contains(&candidate.density_ratio));
            if candidate.size_class == SizeClass::Large {
                assert!(candidate.density_ratio > config.medium_threshold);
            }
            assert!(candidate.improvement_score >= config.score_base);
            assert!(candidate.improvement_score <= config.score_max);
        }
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let fixture = grid_fixture((-23.6, -46.7), 6, 0.03, "0");
        let config = config_with_k(5);
        let sink = MemorySink::new();
        let allocator = WarehouseAllocator::new(&config, &sink);

        let first = allocator.allocate(fixture.inputs()).unwrap();
        let second = allocator.allocate(fixture.inputs()).unwrap();

        assert_eq!(first.candidates.len(), second.candidates.len());
        for (a, b) in first.candidates.iter().zip(second.candidates.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.customer_count, b.customer_count);
            assert!((a.latitude - b.latitude).abs() < 1e-9);
            assert!((a.longitude - b.longitude).abs() < 1e-9);
        }
    }

    #[test]
    fn test_outlier_is_trimmed_from_count() {
        // 20 distinct points in a tight line and one far member of the same cluster
        let mut customers = Vec::new();
        let mut geolocation = Vec::new();
        for i in 0..20 {
            let zip = format!("z{i}");
            customers.push(customer(&format!("c{i}"), &zip));
            geolocation.push(geo(&zip, -23.5 + i as f64 * 0.001, -46.6));
        }
        customers.push(customer("far", "zfar"));
        geolocation.push(geo("zfar", -23.0, -46.6));
        let fixture = Fixture {
            customers,
            geolocation,
            orders: vec![order("o0", "c0")],
            items: vec![item("o0", "p0")],
            products: Vec::new(),
        };

        let config = AllocationConfig {
            clusters: Some(1),
            max_subdivision_depth: 0,
            ..Default::default()
        };
        let sink = MemorySink::new();
        let allocation = WarehouseAllocator::new(&config, &sink)
            .allocate(fixture.inputs())
            .unwrap();

        assert_eq!(allocation.candidates.len(), 1);
        assert_eq!(allocation.cluster_logs[0].member_count, 21);
        assert_eq!(allocation.cluster_logs[0].outliers_removed, 1);
        assert_eq!(allocation.candidates[0].customer_count, 20);
        assert!((allocation.candidates[0].density_ratio - 20.0 / 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_cluster_count_bounds() {
        let config = AllocationConfig::default();

        // Heuristic floor dominates small datasets
        assert_eq!(resolve_cluster_count(&config, 10_000, 5_000), 30);
        // sqrt(4_000_000)/15 = 133 → ceiling
        assert_eq!(resolve_cluster_count(&config, 4_000_000, 100_000), 120);
        // Scarce locations shrink to max(5, points/2)
        assert_eq!(resolve_cluster_count(&config, 500, 20), 10);
        assert_eq!(resolve_cluster_count(&config, 500, 8), 5);

        for distinct in 5..200 {
            let k = resolve_cluster_count(&config, distinct * 3, distinct);
            assert!(k >= 5 && k <= config.k_ceiling.min(distinct), "k={k} distinct={distinct}");
        }

        // Explicit k is honored but never exceeds the locations
        assert_eq!(resolve_cluster_count(&config_with_k(2), 12, 2), 2);
        assert_eq!(resolve_cluster_count(&config_with_k(8), 12, 3), 3);
    }

    #[test]
    fn test_size_classification_is_monotonic() {
        let config = AllocationConfig::default();
        assert_eq!(classify_size(0.05, &config), SizeClass::Large);
        assert_eq!(classify_size(0.04, &config), SizeClass::Medium);
        assert_eq!(classify_size(0.02, &config), SizeClass::Medium);
        assert_eq!(classify_size(0.015, &config), SizeClass::Small);

        let mut previous = SizeClass::Small;
        for step in 0..=100 {
            let class = classify_size(step as f64 / 100.0, &config);
            assert!(class >= previous);
            previous = class;
        }
    }

    #[test]
    fn test_improvement_score_range() {
        let config = AllocationConfig::default();
        assert_eq!(improvement_score(0.0, &config), 10.0);
        assert!((improvement_score(0.05, &config) - 17.5).abs() < 1e-12);
        assert_eq!(improvement_score(0.1, &config), 25.0);
        assert_eq!(improvement_score(0.9, &config), 25.0);

        let mut previous = improvement_score(0.0, &config);
        for step in 1..=100 {
            let score = improvement_score(step as f64 / 100.0, &config);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_most_frequent_breaks_ties_by_key() {
        let counts: HashMap<&str, usize> = [("b", 2), ("a", 2), ("c", 5), ("d", 1)].into_iter().collect();
        assert_eq!(most_frequent(counts, 3), vec!["c", "a", "b"]);
    }
}
