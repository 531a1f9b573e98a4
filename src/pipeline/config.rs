use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::autocal::CalConfig;
use crate::detect::DetectorConfig;
use crate::physics::retention::VanGenuchten;
use crate::sensor::calibration::SensorCalibration;
use crate::sensor::qc::QcPolicy;

/// Top-level AgriScan configuration, parsed from `agriscan.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgriScanConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub soil: SoilConfig,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub calibration: CalibrationSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub reference: ReferenceSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Sample cadence in seconds. Must leave at least 3 samples inside the
    /// slope window and 10 inside the plateau hold.
    #[serde(default = "default_sample_cadence_s")]
    pub sample_cadence_s: u64,
    /// Commissioning mode: relaxed calibration thresholds, same physics.
    #[serde(default)]
    pub simulation_mode: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_cadence_s: default_sample_cadence_s(),
            simulation_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub offset: f64,
    /// Temperature compensation coefficient; 0 disables the correction.
    /// Document any non-zero value with the site notes.
    #[serde(default)]
    pub temp_coeff: f64,
    #[serde(default = "default_temp_ref_c")]
    pub temp_ref_c: f64,
    /// Physical VWC bounds, [min, max].
    #[serde(default = "default_theta_bounds")]
    pub theta_bounds: [f64; 2],
    #[serde(default = "default_spike_z_thresh")]
    pub spike_z_thresh: f64,
    #[serde(default = "default_stuck_eps")]
    pub stuck_eps: f64,
    /// Minimum wall-clock span of the stuck window. Defaults to nine sample
    /// periods when absent.
    #[serde(default)]
    pub stuck_min_duration_s: Option<i64>,
    /// Valid probe temperature range, [min, max] degrees C.
    #[serde(default = "default_temp_bounds")]
    pub temp_bounds: [f64; 2],
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            offset: 0.0,
            temp_coeff: 0.0,
            temp_ref_c: default_temp_ref_c(),
            theta_bounds: default_theta_bounds(),
            spike_z_thresh: default_spike_z_thresh(),
            stuck_eps: default_stuck_eps(),
            stuck_min_duration_s: None,
            temp_bounds: default_temp_bounds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoilConfig {
    #[serde(default = "default_root_depth_cm")]
    pub root_depth_cm: f64,
    #[serde(default = "default_theta_r")]
    pub theta_r: f64,
    #[serde(default = "default_theta_s")]
    pub theta_s: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_n")]
    pub n: f64,
    #[serde(default = "default_k_s")]
    pub k_s: f64,
}

impl Default for SoilConfig {
    fn default() -> Self {
        Self {
            root_depth_cm: default_root_depth_cm(),
            theta_r: default_theta_r(),
            theta_s: default_theta_s(),
            alpha: default_alpha(),
            n: default_n(),
            k_s: default_k_s(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSection {
    #[serde(default = "default_slope_window_s")]
    pub slope_window_s: i64,
    #[serde(default = "default_wet_jump_thresh")]
    pub wet_jump_thresh: f64,
    #[serde(default = "default_min_event_separation_s")]
    pub min_event_separation_s: i64,
    #[serde(default = "default_post_event_ignore_s")]
    pub post_event_ignore_s: i64,
    #[serde(default = "default_s_min")]
    pub s_min: f64,
    #[serde(default = "default_hold_hours")]
    pub hold_hours: f64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            slope_window_s: default_slope_window_s(),
            wet_jump_thresh: default_wet_jump_thresh(),
            min_event_separation_s: default_min_event_separation_s(),
            post_event_ignore_s: default_post_event_ignore_s(),
            s_min: default_s_min(),
            hold_hours: default_hold_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationSection {
    #[serde(default = "default_fc_update_lambda")]
    pub fc_update_lambda: f64,
    #[serde(default = "default_eta_refill")]
    pub eta_refill: f64,
    #[serde(default = "default_refill_hysteresis")]
    pub refill_hysteresis: f64,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            fc_update_lambda: default_fc_update_lambda(),
            eta_refill: default_eta_refill(),
            refill_hysteresis: default_refill_hysteresis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Samples accumulated in RAM before one transactional flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bounded wait for the store lock before a handler gives up.
    #[serde(default = "default_lock_timeout_s")]
    pub lock_timeout_s: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            lock_timeout_s: default_lock_timeout_s(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSection {
    #[serde(default = "default_reference_path")]
    pub reference_path: String,
    #[serde(default = "default_prefs_path")]
    pub prefs_path: String,
}

impl Default for ReferenceSection {
    fn default() -> Self {
        Self {
            reference_path: default_reference_path(),
            prefs_path: default_prefs_path(),
        }
    }
}

// ─── Defaults ────────────────────────────────────────────────────

fn default_sample_cadence_s() -> u64 {
    900
}

fn default_gain() -> f64 {
    1.0
}

fn default_temp_ref_c() -> f64 {
    20.0
}

fn default_theta_bounds() -> [f64; 2] {
    [0.0, 0.50]
}

fn default_spike_z_thresh() -> f64 {
    6.0
}

fn default_stuck_eps() -> f64 {
    0.001
}

fn default_temp_bounds() -> [f64; 2] {
    [-10.0, 60.0]
}

fn default_root_depth_cm() -> f64 {
    30.0
}

fn default_theta_r() -> f64 {
    0.078
}

fn default_theta_s() -> f64 {
    0.43
}

fn default_alpha() -> f64 {
    0.036
}

fn default_n() -> f64 {
    1.56
}

fn default_k_s() -> f64 {
    25.0
}

fn default_slope_window_s() -> i64 {
    7_200
}

fn default_wet_jump_thresh() -> f64 {
    0.02
}

fn default_min_event_separation_s() -> i64 {
    43_200
}

fn default_post_event_ignore_s() -> i64 {
    3_600
}

fn default_s_min() -> f64 {
    5e-4
}

fn default_hold_hours() -> f64 {
    8.0
}

fn default_fc_update_lambda() -> f64 {
    0.25
}

fn default_eta_refill() -> f64 {
    0.5
}

fn default_refill_hysteresis() -> f64 {
    0.01
}

fn default_database_path() -> String {
    "agriscan.db".to_string()
}

fn default_batch_size() -> usize {
    6
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_lock_timeout_s() -> u64 {
    2
}

fn default_reference_path() -> String {
    "reference.json".to_string()
}

fn default_prefs_path() -> String {
    "preferences.json".to_string()
}

// ─── Loading ─────────────────────────────────────────────────────

impl AgriScanConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self> {
        let config: AgriScanConfig =
            toml::from_str(toml_str).with_context(|| "Failed to parse agriscan.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic invariants that serde can't enforce.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.sampling.sample_cadence_s > 0,
            "sampling.sample_cadence_s must be greater than 0"
        );
        anyhow::ensure!(
            self.sampling.sample_cadence_s as i64 * 3 <= self.detector.slope_window_s,
            "sampling.sample_cadence_s must fit at least 3 samples in detector.slope_window_s"
        );
        let hold_s = (self.detector.hold_hours * 3600.0) as u64;
        anyhow::ensure!(
            self.sampling.sample_cadence_s * 10 <= hold_s,
            "sampling.sample_cadence_s must fit at least 10 samples in the plateau hold"
        );
        anyhow::ensure!(
            self.persistence.batch_size > 0,
            "persistence.batch_size must be greater than 0"
        );
        anyhow::ensure!(
            self.sensor.theta_bounds[0] < self.sensor.theta_bounds[1],
            "sensor.theta_bounds must be ordered"
        );
        anyhow::ensure!(
            self.sensor.temp_bounds[0] < self.sensor.temp_bounds[1],
            "sensor.temp_bounds must be ordered"
        );
        anyhow::ensure!(
            self.calibration.fc_update_lambda > 0.0 && self.calibration.fc_update_lambda <= 1.0,
            "calibration.fc_update_lambda must be in (0, 1]"
        );
        anyhow::ensure!(
            self.calibration.eta_refill > 0.0 && self.calibration.eta_refill <= 1.0,
            "calibration.eta_refill must be in (0, 1]"
        );
        anyhow::ensure!(
            self.calibration.refill_hysteresis >= 0.0,
            "calibration.refill_hysteresis must not be negative"
        );
        anyhow::ensure!(
            self.soil.theta_r < self.soil.theta_s,
            "soil.theta_r must be below soil.theta_s"
        );
        anyhow::ensure!(self.soil.n > 1.0, "soil.n must be greater than 1");
        anyhow::ensure!(
            self.soil.root_depth_cm > 0.0,
            "soil.root_depth_cm must be greater than 0"
        );
        Ok(())
    }

    // ─── Typed views for the components ──────────────────────────

    pub fn sensor_calibration(&self) -> SensorCalibration {
        SensorCalibration::new(
            self.sensor.gain,
            self.sensor.offset,
            self.sensor.temp_coeff,
            self.sensor.temp_ref_c,
        )
    }

    pub fn qc_policy(&self) -> QcPolicy {
        QcPolicy {
            theta_min: self.sensor.theta_bounds[0],
            theta_max: self.sensor.theta_bounds[1],
            spike_z_thresh: self.sensor.spike_z_thresh,
            stuck_eps: self.sensor.stuck_eps,
            stuck_min_duration_s: self
                .sensor
                .stuck_min_duration_s
                .unwrap_or(9 * self.sampling.sample_cadence_s as i64),
            temp_min_c: self.sensor.temp_bounds[0],
            temp_max_c: self.sensor.temp_bounds[1],
        }
    }

    pub fn van_genuchten(&self) -> VanGenuchten {
        VanGenuchten {
            theta_r: self.soil.theta_r,
            theta_s: self.soil.theta_s,
            alpha: self.soil.alpha,
            n: self.soil.n,
            k_s: self.soil.k_s,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            slope_window_s: self.detector.slope_window_s,
            wet_window_s: self.detector.slope_window_s,
            wet_jump_thresh: self.detector.wet_jump_thresh,
            min_event_separation_s: self.detector.min_event_separation_s,
            s_min: self.detector.s_min,
            hold_hours: self.detector.hold_hours,
            hold_min_samples: 10,
            sim_trend_thresh: 0.03,
        }
    }

    pub fn cal_config(&self) -> CalConfig {
        let mut cal = CalConfig::new(self.sampling.simulation_mode);
        cal.fc_update_lambda = self.calibration.fc_update_lambda;
        cal.eta_refill = self.calibration.eta_refill;
        cal.post_event_ignore_s = self.detector.post_event_ignore_s;
        cal
    }
}

// ─── Tests ───────────────────────────────────────────────────────
