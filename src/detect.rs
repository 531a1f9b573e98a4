//! Event detection and regime classification over the trailing window.
//!
//! All decisions here read the ring buffer only; nothing in this module
//! holds state. The auto-calibration state machine decides what to do with
//! a detection.

use crate::ring::RingBuffer;
use crate::sample::Regime;

/// Detection thresholds. Defaults match the production cadence; the
/// simulation-mode relaxations live in the `sim_*` fields.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Trailing window for the drying-rate slope, seconds.
    pub slope_window_s: i64,
    /// Window over which a wetting jump is measured, seconds.
    pub wet_window_s: i64,
    /// Minimum theta rise over the wetting window.
    pub wet_jump_thresh: f64,
    /// Minimum spacing between accepted events, seconds.
    pub min_event_separation_s: i64,
    /// Slope magnitude below which the profile counts as flat, m3/m3 per hour.
    pub s_min: f64,
    /// Hold window for the field-capacity plateau, hours.
    pub hold_hours: f64,
    /// Minimum samples inside the hold window.
    pub hold_min_samples: usize,
    /// Simulation mode: a 5-sample trend above this also counts as wetting.
    pub sim_trend_thresh: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            slope_window_s: 7_200,
            wet_window_s: 7_200,
            wet_jump_thresh: 0.02,
            min_event_separation_s: 43_200,
            s_min: 5e-4,
            hold_hours: 8.0,
            hold_min_samples: 10,
            sim_trend_thresh: 0.03,
        }
    }
}

/// Outcome of a wetting-event check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WettingCheck {
    Event(WettingEvent),
    TooSoonAfterLastEvent,
    BelowThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WettingEvent {
    pub ts_start: i64,
    pub ts_end: i64,
    pub delta_theta: f64,
}

/// Candidate field capacity from a drainage plateau.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauCandidate {
    pub theta_fc: f64,
    pub ts_start: i64,
    pub ts_end: i64,
    pub n_samples: usize,
}

/// Ordinary least-squares slope of `(x, y)` points. None with fewer than
/// 3 points or a degenerate x spread.
pub fn ols_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for &(x, y) in points {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }
    if sxx <= f64::EPSILON {
        return None;
    }
    Some(sxy / sxx)
}

/// Median of a value set. None when empty.
pub fn median(values: &mut Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Convert `(timestamp, theta)` pairs to `(hours, theta)` relative to the
/// earliest point.
fn to_hours(points: &[(i64, f64)]) -> Vec<(f64, f64)> {
    let t0 = points.first().map(|p| p.0).unwrap_or(0);
    points
        .iter()
        .map(|&(ts, theta)| ((ts - t0) as f64 / 3600.0, theta))
        .collect()
}

/// dtheta/dt over the trailing slope window, m3/m3 per hour.
///
/// QC-valid samples only; `current` is the incoming point, not yet in the
/// ring. None with fewer than 3 points.
pub fn drying_rate(
    ring: &RingBuffer,
    current: Option<(i64, f64)>,
    now_ts: i64,
    window_s: i64,
) -> Option<f64> {
    let mut points = ring.good_points_since(now_ts - window_s);
    if let Some(p) = current {
        points.push(p);
    }
    ols_slope(&to_hours(&points))
}

/// Check for a wetting event ending at `now_ts`.
pub fn detect_wetting(
    ring: &RingBuffer,
    current: Option<(i64, f64)>,
    now_ts: i64,
    cfg: &DetectorConfig,
    last_event_ts: Option<i64>,
    simulation: bool,
) -> WettingCheck {
    let mut points = ring.good_points_since(now_ts - cfg.wet_window_s);
    if let Some(p) = current {
        points.push(p);
    }
    if points.len() < 2 {
        return WettingCheck::BelowThreshold;
    }

    let (ts_start, theta_start) = points[0];
    let (ts_end, theta_end) = points[points.len() - 1];
    let delta = theta_end - theta_start;

    let mut triggered = delta >= cfg.wet_jump_thresh;
    if !triggered && simulation && points.len() >= 5 {
        // Commissioning relaxation: a steady 5-sample climb counts too.
        let tail = &points[points.len() - 5..];
        let trend = tail[4].1 - tail[0].1;
        triggered = trend > cfg.sim_trend_thresh;
    }
    if !triggered {
        return WettingCheck::BelowThreshold;
    }

    if let Some(last) = last_event_ts {
        if now_ts - last < cfg.min_event_separation_s {
            return WettingCheck::TooSoonAfterLastEvent;
        }
    }

    WettingCheck::Event(WettingEvent {
        ts_start,
        ts_end,
        delta_theta: delta,
    })
}

/// Look for a field-capacity plateau in the trailing hold window.
///
/// Requires the hold to be populated (enough samples spanning nearly the
/// whole window) and flat (slope magnitude under `s_min`). The candidate is
/// the median theta over the hold.
pub fn fc_plateau(
    ring: &RingBuffer,
    current: Option<(i64, f64)>,
    now_ts: i64,
    cfg: &DetectorConfig,
) -> Option<PlateauCandidate> {
    let hold_s = (cfg.hold_hours * 3600.0) as i64;
    let mut points = ring.good_points_since(now_ts - hold_s);
    if let Some(p) = current {
        points.push(p);
    }
    if points.len() < cfg.hold_min_samples {
        return None;
    }
    let ts_start = points[0].0;
    let ts_end = points[points.len() - 1].0;
    // The samples must actually span the hold, not cluster at its end.
    if ts_end - ts_start < hold_s * 9 / 10 {
        return None;
    }
    let slope = ols_slope(&to_hours(&points))?;
    if slope.abs() >= cfg.s_min {
        return None;
    }
    let mut thetas: Vec<f64> = points.iter().map(|p| p.1).collect();
    let n_samples = thetas.len();
    median(&mut thetas).map(|theta_fc| PlateauCandidate {
        theta_fc,
        ts_start,
        ts_end,
        n_samples,
    })
}

/// Classify the current regime from the trailing slope and calibration state.
pub fn classify_regime(
    slope: Option<f64>,
    theta: f64,
    theta_fc: Option<f64>,
    s_min: f64,
) -> Regime {
    match slope {
        None => Regime::Unknown,
        Some(s) if s > 0.001 => Regime::Wetting,
        Some(s) if s.abs() < s_min => Regime::Stable,
        Some(_) => match theta_fc {
            Some(fc) if theta > fc => Regime::Drainage,
            Some(_) => Regime::Drydown,
            None => Regime::Unknown,
        },
    }
}
