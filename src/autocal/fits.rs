//! Parameter fits over detected drainage and drydown segments.

use crate::detect::ols_slope;

/// Acceptance band for the drainage rate constant, 1/hr.
const K_D_MIN: f64 = 0.001;
const K_D_MAX: f64 = 1.0;

/// Acceptance band for the drydown coefficient, 1/hr.
const K_U_MAX: f64 = 0.1;

/// Offset subtracted from the observed minimum to estimate the dry floor.
const THETA_MIN_MARGIN: f64 = 0.01;

/// Fit the drainage rate constant k_d on a segment above field capacity.
///
/// Log-linear regression: the slope of `ln(theta - theta_fc)` against hours
/// is `-k_d`. Requires at least 5 points above field capacity; the result is
/// accepted only inside [0.001, 1.0].
pub fn drainage_k_fit(points: &[(i64, f64)], theta_fc: f64) -> Option<f64> {
    let above: Vec<(i64, f64)> = points
        .iter()
        .filter(|&&(_, theta)| theta > theta_fc + 1e-9)
        .copied()
        .collect();
    if above.len() < 5 {
        return None;
    }
    let t0 = above[0].0;
    let log_points: Vec<(f64, f64)> = above
        .iter()
        .map(|&(ts, theta)| (((ts - t0) as f64) / 3600.0, (theta - theta_fc).ln()))
        .collect();
    let slope = ols_slope(&log_points)?;
    let k_d = -slope;
    if (K_D_MIN..=K_D_MAX).contains(&k_d) {
        Some(k_d)
    } else {
        None
    }
}

/// Result of a drydown fit with beta pinned to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrydownFit {
    pub k_u: f64,
    pub theta_min: f64,
}

/// Simplified exponential drydown fit over a segment below field capacity.
///
/// With beta = 1 the solution is `theta(t) = theta_min + (theta_0 -
/// theta_min) * exp(-k_u t)`, so `k_u = -ln((theta_end - theta_min) /
/// (theta_0 - theta_min)) / t`. The dry floor is estimated as the segment
/// minimum less a small margin. Accepted only for 0 < k_u < 0.1.
pub fn drydown_fit(points: &[(i64, f64)]) -> Option<DrydownFit> {
    if points.len() < 2 {
        return None;
    }
    let (t_start, theta_0) = points[0];
    let (t_end, theta_end) = points[points.len() - 1];
    let hours = (t_end - t_start) as f64 / 3600.0;
    if hours <= 0.0 {
        return None;
    }

    let observed_min = points
        .iter()
        .map(|&(_, theta)| theta)
        .fold(f64::INFINITY, f64::min);
    let theta_min = observed_min - THETA_MIN_MARGIN;

    let num = theta_end - theta_min;
    let den = theta_0 - theta_min;
    if num <= 0.0 || den <= 0.0 || num >= den {
        return None;
    }
    let k_u = -(num / den).ln() / hours;
    if k_u > 0.0 && k_u < K_U_MAX {
        Some(DrydownFit { k_u, theta_min })
    } else {
        None
    }
}

/// The p-th percentile (0..100) by nearest-rank on a sorted copy.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[rank.min(sorted.len() - 1)])
}
