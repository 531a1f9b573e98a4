//! Sample quality control.
//!
//! Flags are computed against the trailing ring buffer before the new sample
//! is pushed. QC is advisory for persistence (flagged samples are still
//! stored) and gating for calibration learning (flagged samples never
//! advance the state machine).

use crate::ring::RingBuffer;
use crate::sample::QcFlag;
use crate::sensor::{ADC_MAX, ADC_MIN};

/// Guard against division by zero in the spike z-score.
const SPIKE_STD_EPS: f64 = 1e-6;

/// Thresholds for the QC checks. Defaults follow the probe's physical span
/// and the production cadence.
#[derive(Debug, Clone, Copy)]
pub struct QcPolicy {
    pub theta_min: f64,
    pub theta_max: f64,
    /// Spike threshold on |theta - mean(last 5)| / (std(last 5) + eps).
    pub spike_z_thresh: f64,
    /// Range of the last 10 samples below which the probe counts as stuck.
    pub stuck_eps: f64,
    /// Minimum span those 10 samples must cover before STUCK fires.
    pub stuck_min_duration_s: i64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
}

impl Default for QcPolicy {
    fn default() -> Self {
        Self {
            theta_min: 0.0,
            theta_max: 0.50,
            spike_z_thresh: 6.0,
            stuck_eps: 0.001,
            // Nine prior samples plus the current one at 15-minute cadence.
            stuck_min_duration_s: 9 * 900,
            temp_min_c: -10.0,
            temp_max_c: 60.0,
        }
    }
}

impl QcPolicy {
    /// Evaluate all checks for an incoming sample against the trailing
    /// history. `unclamped_theta` is the conversion output before the final
    /// clamp; `raw` is the ADC count.
    pub fn evaluate(
        &self,
        raw: i32,
        unclamped_theta: f64,
        theta: f64,
        temp_c: f64,
        ts: i64,
        ring: &RingBuffer,
    ) -> Vec<QcFlag> {
        let mut flags = Vec::new();

        let raw_out = raw < ADC_MIN || raw > ADC_MAX;
        if raw_out || unclamped_theta < self.theta_min || unclamped_theta > self.theta_max {
            flags.push(QcFlag::OutOfBounds);
        }

        if self.is_spike(theta, ring) {
            flags.push(QcFlag::Spike);
        }

        if self.is_stuck(theta, ts, ring) {
            flags.push(QcFlag::Stuck);
        }

        if temp_c < self.temp_min_c || temp_c > self.temp_max_c {
            flags.push(QcFlag::TempOutOfRange);
        }

        flags
    }

    fn is_spike(&self, theta: f64, ring: &RingBuffer) -> bool {
        let recent: Vec<f64> = ring.last_n(5).map(|s| s.theta).collect();
        if recent.len() < 5 {
            return false;
        }
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let var = recent.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / recent.len() as f64;
        let z = (theta - mean).abs() / (var.sqrt() + SPIKE_STD_EPS);
        z > self.spike_z_thresh
    }

    fn is_stuck(&self, theta: f64, ts: i64, ring: &RingBuffer) -> bool {
        // Nine prior samples plus the incoming one form the 10-sample window.
        let prior: Vec<(i64, f64)> = ring.last_n(9).map(|s| (s.timestamp, s.theta)).collect();
        if prior.len() < 9 {
            return false;
        }
        let mut lo = theta;
        let mut hi = theta;
        for &(_, t) in &prior {
            lo = lo.min(t);
            hi = hi.max(t);
        }
        if hi - lo >= self.stuck_eps {
            return false;
        }
        let oldest_ts = prior[0].0;
        ts - oldest_ts >= self.stuck_min_duration_s
    }
}
