//! Learned drainage/drydown dynamics and short-horizon forecasts.
//!
//! Two first-order ODEs describe the water balance between irrigation
//! events:
//!
//! - drainage, above field capacity: `d(theta)/dt = -k_d * (theta - theta_fc)`
//! - drydown, below field capacity: `d(theta)/dt = -k_u * (theta - theta_min)^beta`
//!
//! Forward simulation is explicit Euler with a 6-hour step; it backs the
//! day-ahead and 7-day outlooks and the irrigation-depth comparison.

use serde::{Deserialize, Serialize};

/// Euler step for forward simulation, hours.
pub const EULER_DT_HOURS: f64 = 6.0;

/// Dynamics parameters fitted by the auto-calibration engine.
///
/// All fields except `beta` start unknown; the serde form is the opaque
/// `params_json` persisted with each calibration version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DynamicsParams {
    /// Drainage rate constant, 1/hr.
    pub k_d: Option<f64>,
    /// Drydown rate coefficient, 1/hr (with beta = 1).
    pub k_u: Option<f64>,
    /// Drydown exponent. The simplified fit pins this to 1.
    pub beta: f64,
    /// Asymptotic dry floor of the drydown, m3/m3.
    pub theta_min: Option<f64>,
}

impl Default for DynamicsParams {
    fn default() -> Self {
        Self {
            k_d: None,
            k_u: None,
            beta: 1.0,
            theta_min: None,
        }
    }
}

impl DynamicsParams {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Instantaneous rate of change of theta, m3/m3 per hour.
///
/// Above field capacity the drainage term applies; below it the drydown
/// term. Unknown parameters contribute zero (no forecast without a fit).
pub fn dtheta_dt(theta: f64, theta_fc: f64, params: &DynamicsParams) -> f64 {
    if theta > theta_fc {
        match params.k_d {
            Some(k_d) => -k_d * (theta - theta_fc),
            None => 0.0,
        }
    } else {
        match (params.k_u, params.theta_min) {
            (Some(k_u), Some(theta_min)) if theta > theta_min => {
                -k_u * (theta - theta_min).powf(params.beta)
            }
            _ => 0.0,
        }
    }
}

/// Explicit-Euler trajectory from `theta0` over `horizon_hours`.
/// Returns `(t_hours, theta)` points including the starting state.
pub fn simulate(
    theta0: f64,
    theta_fc: f64,
    params: &DynamicsParams,
    horizon_hours: f64,
) -> Vec<(f64, f64)> {
    let mut out = vec![(0.0, theta0)];
    let mut theta = theta0;
    let mut t = 0.0;
    while t < horizon_hours {
        let dt = EULER_DT_HOURS.min(horizon_hours - t);
        theta += dtheta_dt(theta, theta_fc, params) * dt;
        t += dt;
        out.push((t, theta));
    }
    out
}

/// Theta after `hours` under the fitted dynamics.
pub fn theta_after(theta0: f64, theta_fc: f64, params: &DynamicsParams, hours: f64) -> f64 {
    simulate(theta0, theta_fc, params, hours)
        .last()
        .map(|&(_, theta)| theta)
        .unwrap_or(theta0)
}

/// Water-content increment from an irrigation depth `depth_mm` spread over
/// `root_depth_cm` of soil.
pub fn irrigation_delta_theta(depth_mm: f64, root_depth_cm: f64) -> f64 {
    depth_mm / (root_depth_cm * 10.0)
}

/// Apply an irrigation depth, capping at saturation.
pub fn apply_irrigation(theta: f64, depth_mm: f64, root_depth_cm: f64, theta_s: f64) -> f64 {
    (theta + irrigation_delta_theta(depth_mm, root_depth_cm)).min(theta_s)
}

/// For each candidate depth, the theta reached after `horizon_hours` when
/// that depth is applied now. Used to compare irrigation options.
pub fn compare_irrigation_depths(
    theta0: f64,
    depths_mm: &[f64],
    root_depth_cm: f64,
    theta_s: f64,
    theta_fc: f64,
    params: &DynamicsParams,
    horizon_hours: f64,
) -> Vec<(f64, f64)> {
    depths_mm
        .iter()
        .map(|&depth| {
            let start = apply_irrigation(theta0, depth, root_depth_cm, theta_s);
            (depth, theta_after(start, theta_fc, params, horizon_hours))
        })
        .collect()
}
