//! `agriscan init` — scaffold a working directory.

use anyhow::{Context, Result};
use std::path::Path;

use crate::prefs::Preferences;
use crate::reference::ReferenceData;

const DEFAULT_CONFIG: &str = r#"# AgriScan node configuration.
# Every value shown is the default; delete what you don't change.

[sampling]
sample_cadence_s = 900
simulation_mode = false

[sensor]
gain = 1.0
offset = 0.0
# Temperature compensation is disabled by default. Document any non-zero
# coefficient with the site notes.
temp_coeff = 0.0
temp_ref_c = 20.0
theta_bounds = [0.0, 0.50]
spike_z_thresh = 6.0
stuck_eps = 0.001
temp_bounds = [-10.0, 60.0]

[soil]
root_depth_cm = 30.0
# van Genuchten parameters, defaulting to loam.
theta_r = 0.078
theta_s = 0.43
alpha = 0.036
n = 1.56
k_s = 25.0

[detector]
slope_window_s = 7200
wet_jump_thresh = 0.02
min_event_separation_s = 43200
post_event_ignore_s = 3600
s_min = 0.0005
hold_hours = 8.0

[calibration]
fc_update_lambda = 0.25
eta_refill = 0.5
refill_hysteresis = 0.01

[persistence]
database_path = "agriscan.db"
batch_size = 6

[http]
bind_addr = "0.0.0.0:8080"
lock_timeout_s = 2

[reference]
reference_path = "reference.json"
prefs_path = "preferences.json"
"#;

pub fn run_init(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let config_path = dir.join("agriscan.toml");
    if config_path.exists() {
        println!("  agriscan.toml already exists, leaving it untouched.");
    } else {
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .with_context(|| "Failed to write agriscan.toml")?;
        println!("  Wrote {}", config_path.display());
    }

    let reference_path = dir.join("reference.json");
    if reference_path.exists() {
        println!("  reference.json already exists, leaving it untouched.");
    } else {
        let reference = serde_json::to_string_pretty(&ReferenceData::default())?;
        std::fs::write(&reference_path, reference)
            .with_context(|| "Failed to write reference.json")?;
        println!("  Wrote {}", reference_path.display());
    }

    let prefs_path = dir.join("preferences.json");
    if prefs_path.exists() {
        println!("  preferences.json already exists, leaving it untouched.");
    } else {
        let prefs = serde_json::to_string_pretty(&Preferences::default())?;
        std::fs::write(&prefs_path, prefs)
            .with_context(|| "Failed to write preferences.json")?;
        println!("  Wrote {}", prefs_path.display());
    }

    println!("\nStart the node with: agriscan run --config agriscan.toml");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::AgriScanConfig;

    #[test]
    fn test_init_scaffolds_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        run_init(dir.path()).unwrap();

        // The scaffolded config must parse and validate.
        let config = AgriScanConfig::from_file(&dir.path().join("agriscan.toml")).unwrap();
        assert_eq!(config.sampling.sample_cadence_s, 900);

        let reference = ReferenceData::load(&dir.path().join("reference.json")).unwrap();
        assert!(reference.soil("loam").is_some());

        let prefs = Preferences::load(&dir.path().join("preferences.json")).unwrap();
        assert!(!prefs.onboarding_complete);
    }

    #[test]
    fn test_init_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agriscan.toml");
        std::fs::write(&config_path, "# my tuned config\n").unwrap();
        run_init(dir.path()).unwrap();
        let contents = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(contents, "# my tuned config\n");
    }
}
