//! Irrigation status and urgency with hysteresis.
//!
//! The ladder maps (theta, targets, drying rate) to an operator-facing
//! status. A hysteresis band around the refill threshold keeps the status
//! from flapping when theta oscillates at the boundary: once REFILL is
//! entered, leaving it requires theta above the threshold plus the band.
//!
//! Theta at or above field capacity is always FULL and never actionable,
//! whatever the drying rate.

use crate::sample::{Status, Urgency};

/// Drying rate below which MONITOR applies near the top of the comfort band.
const RAPID_DRY_RATE: f64 = -0.002;

/// Drying rate below which MONITOR applies anywhere under field capacity.
const SLOW_DRY_RATE: f64 = -0.0005;

/// Fraction of field capacity that marks the top of the watch band.
const WATCH_BAND_FRACTION: f64 = 0.9;

/// One evaluated decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDecision {
    pub status: Status,
    pub urgency: Urgency,
    pub message: &'static str,
}

/// Stateful status engine. One per pipeline; the retained last status is
/// what implements the hysteresis.
#[derive(Debug, Clone)]
pub struct StatusEngine {
    hysteresis: f64,
    last_status: Status,
}

impl StatusEngine {
    pub fn new(hysteresis: f64) -> Self {
        Self {
            hysteresis,
            last_status: Status::Unknown,
        }
    }

    /// Resume from the last persisted sample after a restart.
    pub fn with_last_status(hysteresis: f64, last_status: Status) -> Self {
        Self {
            hysteresis,
            last_status,
        }
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    /// Evaluate the status for one sample and retain it for hysteresis.
    pub fn evaluate(
        &mut self,
        theta: f64,
        theta_fc: Option<f64>,
        theta_refill: Option<f64>,
        drying_rate: Option<f64>,
    ) -> StatusDecision {
        let decision = decide(
            theta,
            theta_fc,
            theta_refill,
            drying_rate,
            self.last_status,
            self.hysteresis,
        );
        self.last_status = decision.status;
        decision
    }
}

/// Pure decision function. Deterministic in its inputs, including the
/// previous status that carries the hysteresis.
pub fn decide(
    theta: f64,
    theta_fc: Option<f64>,
    theta_refill: Option<f64>,
    drying_rate: Option<f64>,
    last_status: Status,
    hysteresis: f64,
) -> StatusDecision {
    let (Some(fc), Some(refill)) = (theta_fc, theta_refill) else {
        return StatusDecision {
            status: Status::Unknown,
            urgency: Urgency::None,
            message: "Calibrating system...",
        };
    };

    // Sticky REFILL: once entered, theta must clear the band above the
    // threshold before any other status applies.
    if last_status == Status::Refill && theta <= refill + hysteresis {
        return StatusDecision {
            status: Status::Refill,
            urgency: Urgency::High,
            message: "Irrigate now - soil moisture critical",
        };
    }

    if theta < refill - hysteresis {
        return StatusDecision {
            status: Status::Refill,
            urgency: Urgency::High,
            message: "Irrigate now - soil moisture critical",
        };
    }

    let rate = drying_rate.unwrap_or(0.0);
    if theta < fc * WATCH_BAND_FRACTION && rate < RAPID_DRY_RATE {
        return StatusDecision {
            status: Status::Monitor,
            urgency: Urgency::Medium,
            message: "Drying quickly - irrigation likely soon",
        };
    }
    if theta < fc && rate < SLOW_DRY_RATE {
        return StatusDecision {
            status: Status::Monitor,
            urgency: Urgency::Medium,
            message: "Drying - keep an eye on moisture",
        };
    }
    if theta < fc {
        return StatusDecision {
            status: Status::Optimal,
            urgency: Urgency::Low,
            message: "Soil moisture in the comfort band",
        };
    }
    StatusDecision {
        status: Status::Full,
        urgency: Urgency::None,
        message: "Profile full - no action needed",
    }
}

/// Advisory label for the fitted drainage rate. Used only for messaging.
pub fn drainage_quality(k_d: Option<f64>) -> &'static str {
    match k_d {
        None => "unknown",
        Some(k) if k < 0.01 => "poor",
        Some(k) if k > 0.15 => "excessive",
        Some(_) => "good",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FC: f64 = 0.30;
    const REFILL: f64 = 0.20;
    const H: f64 = 0.01;

    fn engine() -> StatusEngine {
        StatusEngine::new(H)
    }

    #[test]
    fn test_unknown_until_refill_known() {
        let mut e = engine();
        let d = e.evaluate(0.25, Some(FC), None, Some(-0.001));
        assert_eq!(d.status, Status::Unknown);
        assert_eq!(d.urgency, Urgency::None);
        let d = e.evaluate(0.25, None, None, None);
        assert_eq!(d.status, Status::Unknown);
    }

    #[test]
    fn test_refill_below_band() {
        let mut e = engine();
        let d = e.evaluate(REFILL - H - 0.001, Some(FC), Some(REFILL), Some(-0.001));
        assert_eq!(d.status, Status::Refill);
        assert_eq!(d.urgency, Urgency::High);
    }

    #[test]
    fn test_monitor_when_drying_fast_low_in_band() {
        let mut e = engine();
        let d = e.evaluate(0.25, Some(FC), Some(REFILL), Some(-0.003));
        assert_eq!(d.status, Status::Monitor);
        assert_eq!(d.urgency, Urgency::Medium);
    }

    #[test]
    fn test_monitor_when_drying_slowly_below_fc() {
        let mut e = engine();
        let d = e.evaluate(0.29, Some(FC), Some(REFILL), Some(-0.001));
        assert_eq!(d.status, Status::Monitor);
    }

    #[test]
    fn test_optimal_when_steady_below_fc() {
        let mut e = engine();
        let d = e.evaluate(0.28, Some(FC), Some(REFILL), Some(-0.0001));
        assert_eq!(d.status, Status::Optimal);
        assert_eq!(d.urgency, Urgency::Low);
    }

    #[test]
    fn test_full_above_fc_even_when_drying_fast() {
        let mut e = engine();
        let d = e.evaluate(0.35, Some(FC), Some(REFILL), Some(-0.01));
        assert_eq!(d.status, Status::Full);
        assert_eq!(d.urgency, Urgency::None);
    }

    #[test]
    fn test_hysteresis_prevents_flapping() {
        let mut e = engine();
        // Enter REFILL.
        let d = e.evaluate(REFILL - 0.02, Some(FC), Some(REFILL), Some(-0.001));
        assert_eq!(d.status, Status::Refill);
        // Oscillating inside the band stays REFILL.
        for theta in [REFILL, REFILL + 0.005, REFILL - 0.005, REFILL + H] {
            let d = e.evaluate(theta, Some(FC), Some(REFILL), Some(0.0));
            assert_eq!(d.status, Status::Refill, "flapped at theta {theta}");
        }
        // Clearing the band releases it.
        let d = e.evaluate(REFILL + H + 0.001, Some(FC), Some(REFILL), Some(0.0));
        assert_ne!(d.status, Status::Refill);
    }

    #[test]
    fn test_decide_is_deterministic() {
        for _ in 0..3 {
            let a = decide(0.25, Some(FC), Some(REFILL), Some(-0.003), Status::Optimal, H);
            let b = decide(0.25, Some(FC), Some(REFILL), Some(-0.003), Status::Optimal, H);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_drainage_quality_labels() {
        assert_eq!(drainage_quality(None), "unknown");
        assert_eq!(drainage_quality(Some(0.005)), "poor");
        assert_eq!(drainage_quality(Some(0.05)), "good");
        assert_eq!(drainage_quality(Some(0.2)), "excessive");
    }
}
