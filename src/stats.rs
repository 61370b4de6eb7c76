//! Small numeric helpers shared by the engine and the calculator

use crate::error::{InsightError, InsightResult};

/// Arithmetic mean; `None` for an empty series
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Percentile with linear interpolation between closest ranks
///
/// # Arguments
/// * `values` - Series in any order
/// * `q` - Percentile in `[0, 100]`
///
/// # Returns
/// * The interpolated value, or a computation error on an empty series
pub fn percentile(values: &[f64], q: f64) -> InsightResult<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, q)
}

/// Same as [`percentile`] for an already sorted series
pub fn percentile_sorted(sorted: &[f64], q: f64) -> InsightResult<f64> {
    if sorted.is_empty() {
        return Err(InsightError::computation(format!(
            "percentile {q} requested on an empty series"
        )));
    }
    if !(0.0..=100.0).contains(&q) {
        return Err(InsightError::computation(format!(
            "percentile {q} outside [0, 100]"
        )));
    }

    let rank = q * (sorted.len() - 1) as f64 / 100.0;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Pearson correlation over pairwise-complete observations.
///
/// Returns `None` with fewer than two complete pairs or when either side has
/// zero variance.
pub fn pearson(pairs: impl IntoIterator<Item = (Option<f64>, Option<f64>)>) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs
        .into_iter()
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        })
        .unzip();

    if xs.len() < 2 {
        return None;
    }

    let mean_x = mean(&xs)?;
    let mean_y = mean(&ys)?;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Least-squares slope of `ys` against `xs`
pub fn linear_slope(xs: &[f64], ys: &[f64]) -> InsightResult<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return Err(InsightError::computation(format!(
            "regression needs at least two paired observations (got {} and {})",
            xs.len(),
            ys.len()
        )));
    }

    let mean_x = xs.iter().sum::<f64>() / xs.len() as f64;
    let mean_y = ys.iter().sum::<f64>() / ys.len() as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }

    if sxx == 0.0 {
        return Err(InsightError::computation(
            "regression over a constant predictor",
        ));
    }
    Ok(sxy / sxx)
}
