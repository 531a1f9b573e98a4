//! Probe abstraction and drivers.
//!
//! The acquisition loop reads through the [`SoilProbe`] trait so the same
//! pipeline runs against real hardware, the deterministic commissioning
//! simulator, or a scripted reading sequence in tests.

pub mod calibration;
pub mod qc;

use crate::sensor::calibration::SensorCalibration;

/// Inclusive ADC span of the moisture probe. Readings outside this span are
/// physically impossible and flag `OUT_OF_BOUNDS`.
pub const ADC_MIN: i32 = 0;
pub const ADC_MAX: i32 = 4095;

/// Disconnect sentinel reported by the temperature probe.
pub const TEMP_DISCONNECT_C: f64 = -127.0;

/// One raw acquisition: ADC count, probe temperature, wall-clock stamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub raw: i32,
    pub temp_c: f64,
    pub timestamp: i64,
}

/// Error from a probe read.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("ADC read failed: {0}")]
    Adc(String),
    #[error("probe sequence exhausted")]
    Exhausted,
}

/// A soil moisture + temperature probe.
///
/// `read` is called once per tick with the tick's wall-clock stamp and must
/// not block longer than a sample period.
pub trait SoilProbe: Send {
    fn read(&mut self, now_ts: i64) -> Result<Reading, ProbeError>;
}

// ─── Simulated probe ─────────────────────────────────────────────

/// Deterministic synthetic probe for commissioning and demos.
///
/// Produces irrigation cycles: an exponential drydown toward a dry floor,
/// with a multi-tick wetting pulse whenever theta falls below the trigger.
/// The trajectory is a pure function of the tick counter, so runs replay
/// identically.
pub struct SimulatedProbe {
    cal: SensorCalibration,
    cadence_s: u64,
    theta: f64,
    wet_ticks_left: u32,
    tick: u64,
}

impl SimulatedProbe {
    const THETA_START: f64 = 0.25;
    const THETA_FLOOR: f64 = 0.12;
    const IRRIGATION_TRIGGER: f64 = 0.145;
    const IRRIGATION_DELTA: f64 = 0.13;
    const WET_TICKS: u32 = 8;
    /// Drydown rate per hour toward the floor.
    const K_DRY: f64 = 0.010;

    pub fn new(cal: SensorCalibration, cadence_s: u64) -> Self {
        Self {
            cal,
            cadence_s,
            theta: Self::THETA_START,
            wet_ticks_left: 0,
            tick: 0,
        }
    }

    /// Deterministic sub-millidegree jitter derived from the tick counter.
    fn noise(&self) -> f64 {
        let h = self.tick.wrapping_mul(2_654_435_761) % 1000;
        (h as f64 / 1000.0 - 0.5) * 0.002
    }
}

impl SoilProbe for SimulatedProbe {
    fn read(&mut self, now_ts: i64) -> Result<Reading, ProbeError> {
        let dt_h = self.cadence_s as f64 / 3600.0;

        if self.wet_ticks_left > 0 {
            self.theta += Self::IRRIGATION_DELTA / Self::WET_TICKS as f64;
            self.wet_ticks_left -= 1;
        } else {
            self.theta -= Self::K_DRY * (self.theta - Self::THETA_FLOOR) * dt_h;
            if self.theta < Self::IRRIGATION_TRIGGER {
                self.wet_ticks_left = Self::WET_TICKS;
            }
        }
        self.theta = self.theta.clamp(0.0, calibration::THETA_CEILING);

        let theta_noisy =
            (self.theta + self.noise()).clamp(0.0, calibration::THETA_CEILING);
        let hours = (self.tick * self.cadence_s) as f64 / 3600.0;
        let temp_c = 20.0 + 4.0 * (hours * std::f64::consts::TAU / 24.0).sin();
        self.tick += 1;

        Ok(Reading {
            raw: self.cal.raw_for_theta(theta_noisy),
            temp_c,
            timestamp: now_ts,
        })
    }
}

// ─── Scripted probe ──────────────────────────────────────────────

/// Replays a fixed reading sequence. Used by the scenario tests and by
/// `check` to exercise the pipeline without hardware.
pub struct ScriptedProbe {
    readings: std::collections::VecDeque<Reading>,
}

impl ScriptedProbe {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self {
            readings: readings.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
}

impl SoilProbe for ScriptedProbe {
    fn read(&mut self, _now_ts: i64) -> Result<Reading, ProbeError> {
        self.readings.pop_front().ok_or(ProbeError::Exhausted)
    }
}
