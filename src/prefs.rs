//! Persistent user preferences.
//!
//! A single JSON file at a fixed path, written by the onboarding wizard and
//! the `/api/config` endpoint, read at boot. Every field has a default so a
//! missing or partial file never blocks startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub onboarding_complete: bool,
    pub device_name: String,
    pub root_depth_cm: f64,
    /// Key into the crop reference table.
    pub crop: String,
    /// Key into the soil reference table.
    pub soil: String,
    /// When the device was set up, epoch seconds.
    pub setup_date: Option<i64>,
    /// When the crop was planted, epoch seconds. Drives stage selection.
    pub planting_ts: Option<i64>,
    pub farmer_name: String,
    pub notes: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            onboarding_complete: false,
            device_name: "agriscan".to_string(),
            root_depth_cm: 30.0,
            crop: "generic".to_string(),
            soil: "loam".to_string(),
            setup_date: None,
            planting_ts: None,
            farmer_name: String::new(),
            notes: String::new(),
        }
    }
}

impl Preferences {
    /// Load preferences, falling back to defaults when the file is missing.
    /// A present-but-invalid file is an error so a corrupted write is not
    /// silently discarded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read preferences: {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| "Failed to parse preferences JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create preferences directory: {}", parent.display())
                })?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))?;
        Ok(())
    }

    /// Days since planting at `now_ts`, if a planting date is set.
    pub fn days_after_planting(&self, now_ts: i64) -> Option<u32> {
        self.planting_ts.map(|planted| {
            let days = (now_ts - planted) / 86_400;
            days.max(0) as u32
        })
    }
}
