//! Seeded K-Means clustering of geographic points

use crate::error::{InsightError, InsightResult};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Parameters of one K-Means fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    pub n_clusters: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    pub n_runs: usize,
    pub seed: u64,
}

/// Fitted clustering of a point matrix
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment of every input row
    pub labels: Array1<usize>,
    /// Mean coordinate of the rows assigned to each cluster
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Row indices assigned to `cluster`, in input order
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| label == cluster)
            .map(|(row, _)| row)
            .collect()
    }
}

/// Fit K-Means on `(lat, lng)` rows
///
/// # Arguments
/// * `points` - Matrix of shape `(n_points, 2)`
/// * `params` - Cluster count, iteration cap, tolerance, restarts and seed
///
/// # Returns
/// * Fitted `KMeansModel`; a computation error when the fit does not converge
pub fn fit_kmeans(points: &Array2<f64>, params: &KMeansParams) -> InsightResult<KMeansModel> {
    let n_samples = points.nrows();
    if params.n_clusters == 0 {
        return Err(InsightError::computation("cluster count must be positive"));
    }
    if n_samples < params.n_clusters {
        return Err(InsightError::data(format!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            n_samples, params.n_clusters
        )));
    }

    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(points.clone(), targets);

    let rng = StdRng::seed_from_u64(params.seed);
    let model = KMeans::params_with(params.n_clusters, rng, L2Dist)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .n_runs(params.n_runs)
        .fit(&dataset)
        .map_err(|e| {
            InsightError::computation(format!(
                "k-means with k={} did not complete within {} iterations: {}",
                params.n_clusters, params.max_iters, e
            ))
        })?;

    let labels = model.predict(&dataset);
    let centroids = member_means(points, &labels, model.centroids());
    let inertia = compute_inertia(points, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters: params.n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Recompute each centroid as the mean of its assigned rows.
///
/// A cluster left without rows keeps the fitted centroid.
fn member_means(points: &Array2<f64>, labels: &Array1<usize>, fitted: &Array2<f64>) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros(fitted.raw_dim());
    let mut counts = vec![0usize; fitted.nrows()];

    for (row, &label) in points.outer_iter().zip(labels.iter()) {
        if label < counts.len() {
            let mut sum = sums.row_mut(label);
            sum += &row;
            counts[label] += 1;
        }
    }

    let mut centroids = fitted.clone();
    for (cluster, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = sums.row(cluster).mapv(|v| v / count as f64);
            centroids.row_mut(cluster).assign(&mean);
        }
    }
    centroids
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            inertia += distance * distance;
        }
    }

    inertia
}

/// Calculate Euclidean distance between two points
pub fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_clusters: usize) -> KMeansParams {
        KMeansParams {
            n_clusters,
            max_iters: 300,
            tolerance: 1e-4,
            n_runs: 10,
            seed: 42,
        }
    }

    fn create_test_points() -> Array2<f64> {
        // Two tight groups: Sao Paulo and Rio de Janeiro
        Array2::from_shape_vec(
            (6, 2),
            vec![
                -23.50, -46.60, //
                -23.51, -46.61, //
                -23.49, -46.62, //
                -23.52, -46.59, //
                -22.90, -43.20, //
                -22.91, -43.21, //
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fit_kmeans_separates_groups() {
        let points = create_test_points();
        let model = fit_kmeans(&points, &params(2)).unwrap();

        assert_eq!(model.n_clusters, 2);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[2, 2]);

        let mut sizes = model.cluster_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 4]);
        assert_eq!(model.labels[0], model.labels[3]);
        assert_ne!(model.labels[0], model.labels[4]);
    }

    #[test]
    fn test_centroids_are_member_means() {
        let points = create_test_points();
        let model = fit_kmeans(&points, &params(2)).unwrap();

        let rio = model.labels[4];
        let centroid = model.centroids.row(rio);
        assert!((centroid[0] - (-22.905)).abs() < 1e-9);
        assert!((centroid[1] - (-43.205)).abs() < 1e-9);
        assert_eq!(model.members(rio), vec![4, 5]);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let points = create_test_points();
        let first = fit_kmeans(&points, &params(3)).unwrap();
        let second = fit_kmeans(&points, &params(3)).unwrap();

        assert_eq!(first.labels, second.labels);
        for (a, b) in first.centroids.iter().zip(second.centroids.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!((first.inertia - second.inertia).abs() < 1e-9);
    }

    #[test]
    fn test_more_clusters_than_points_rejected() {
        let points = create_test_points();
        let err = fit_kmeans(&points, &params(7)).unwrap_err();
        assert_eq!(err.kind(), "DataError");
        assert!(fit_kmeans(&points, &params(0)).is_err());
    }

    #[test]
    fn test_inertia_non_negative() {
        let points = create_test_points();
        let model = fit_kmeans(&points, &params(2)).unwrap();
        assert!(model.inertia >= 0.0);
        assert!(model.inertia.is_finite());
    }
}
