//! Crop and soil reference tables, read once at boot.
//!
//! The tables seed the calibration engine before any site learning has
//! happened: a soil texture gives (theta_fc, theta_wp), a crop stage gives
//! the root depth and depletion fraction p, and the derived refill point is
//! `theta_fc - p * (theta_fc - theta_wp)`.
//!
//! Missing or invalid reference data is a recoverable configuration fault:
//! the built-in defaults (loam, a generic row crop) apply and a boot
//! warning is emitted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// One growth stage, selected by days after planting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropStage {
    pub name: String,
    pub day_start: u32,
    pub day_end: u32,
    /// Root depth during this stage, cm.
    pub zr_cm: f64,
    /// Allowable depletion fraction before refill.
    pub p: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crop {
    pub stages: Vec<CropStage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SoilTexture {
    pub theta_fc: f64,
    pub theta_wp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceData {
    pub crops: HashMap<String, Crop>,
    pub soils: HashMap<String, SoilTexture>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        let mut crops = HashMap::new();
        crops.insert(
            "generic".to_string(),
            Crop {
                stages: vec![
                    CropStage {
                        name: "initial".to_string(),
                        day_start: 0,
                        day_end: 25,
                        zr_cm: 20.0,
                        p: 0.5,
                    },
                    CropStage {
                        name: "development".to_string(),
                        day_start: 26,
                        day_end: 60,
                        zr_cm: 30.0,
                        p: 0.5,
                    },
                    CropStage {
                        name: "mid_season".to_string(),
                        day_start: 61,
                        day_end: 110,
                        zr_cm: 40.0,
                        p: 0.45,
                    },
                    CropStage {
                        name: "late_season".to_string(),
                        day_start: 111,
                        day_end: 140,
                        zr_cm: 40.0,
                        p: 0.55,
                    },
                ],
            },
        );

        let mut soils = HashMap::new();
        soils.insert(
            "loam".to_string(),
            SoilTexture {
                theta_fc: 0.27,
                theta_wp: 0.12,
            },
        );
        soils.insert(
            "sand".to_string(),
            SoilTexture {
                theta_fc: 0.12,
                theta_wp: 0.05,
            },
        );
        soils.insert(
            "clay".to_string(),
            SoilTexture {
                theta_fc: 0.36,
                theta_wp: 0.21,
            },
        );

        Self { crops, soils }
    }
}

impl ReferenceData {
    /// Load the reference table, falling back to the defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Reference data unavailable, using built-in defaults"
                );
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read reference data: {}", path.display()))?;
        let data: ReferenceData = serde_json::from_str(&contents)
            .with_context(|| "Failed to parse reference data JSON")?;
        data.validate()?;
        Ok(data)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, soil) in &self.soils {
            anyhow::ensure!(
                soil.theta_wp < soil.theta_fc,
                "soil '{}' must have theta_wp below theta_fc",
                key
            );
        }
        for (key, crop) in &self.crops {
            anyhow::ensure!(!crop.stages.is_empty(), "crop '{}' has no stages", key);
            for stage in &crop.stages {
                anyhow::ensure!(
                    stage.day_start <= stage.day_end,
                    "crop '{}' stage '{}' has inverted day range",
                    key,
                    stage.name
                );
                anyhow::ensure!(
                    stage.p > 0.0 && stage.p < 1.0,
                    "crop '{}' stage '{}' depletion fraction must be in (0, 1)",
                    key,
                    stage.name
                );
            }
        }
        Ok(())
    }

    /// The growth stage active `days_after_planting` days in. Past the last
    /// stage, the last stage applies.
    pub fn stage_for(&self, crop: &str, days_after_planting: u32) -> Option<&CropStage> {
        let crop = self.crops.get(crop)?;
        crop.stages
            .iter()
            .find(|s| days_after_planting >= s.day_start && days_after_planting <= s.day_end)
            .or_else(|| crop.stages.last())
    }

    pub fn soil(&self, key: &str) -> Option<SoilTexture> {
        self.soils.get(key).copied()
    }

    /// Seed (theta_fc, theta_refill) for the calibrator from a configured
    /// crop and soil. None when the soil is unknown; the crop stage only
    /// refines the depletion fraction.
    pub fn seed_targets(
        &self,
        crop: &str,
        soil: &str,
        days_after_planting: u32,
    ) -> Option<(f64, f64)> {
        let texture = self.soil(soil)?;
        let p = self
            .stage_for(crop, days_after_planting)
            .map(|s| s.p)
            .unwrap_or(0.5);
        let refill = texture.theta_fc - p * (texture.theta_fc - texture.theta_wp);
        Some((texture.theta_fc, refill))
    }
}
