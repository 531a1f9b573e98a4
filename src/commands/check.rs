//! `agriscan check` — validate a node's configuration without starting it.

use anyhow::Result;
use std::path::Path;

use crate::persistence::SampleStore;
use crate::pipeline::config::AgriScanConfig;
use crate::prefs::Preferences;
use crate::reference::ReferenceData;

pub async fn run_check(config_path: &Path) -> Result<()> {
    println!("\x1b[36m\x1b[1mChecking AgriScan node configuration...\x1b[0m");

    // 1. Load agriscan.toml
    let config = match AgriScanConfig::from_file(config_path) {
        Ok(c) => {
            println!("\x1b[32m\x1b[1m✓\x1b[0m Configuration file is valid.");
            c
        }
        Err(e) => {
            println!("\x1b[31m\x1b[1m✗\x1b[0m Configuration error: {}", e);
            return Ok(());
        }
    };

    // 2. Reference data
    let reference_path = Path::new(&config.reference.reference_path);
    match ReferenceData::load(reference_path) {
        Ok(data) => {
            println!(
                "\x1b[32m\x1b[1m✓\x1b[0m Reference data loaded ({} crops, {} soils).",
                data.crops.len(),
                data.soils.len()
            );
        }
        Err(e) => {
            println!(
                "\x1b[33m\x1b[1m! Warning:\x1b[0m Reference data unavailable ({}). \
                 Built-in loam defaults will apply.",
                e
            );
        }
    }

    // 3. Preferences
    let prefs_path = Path::new(&config.reference.prefs_path);
    match Preferences::load(prefs_path) {
        Ok(prefs) => {
            if prefs.onboarding_complete {
                println!(
                    "\x1b[32m\x1b[1m✓\x1b[0m Preferences loaded (device '{}', crop '{}', soil '{}').",
                    prefs.device_name, prefs.crop, prefs.soil
                );
            } else {
                println!(
                    "\x1b[33m\x1b[1m! Warning:\x1b[0m Onboarding not complete; defaults in use."
                );
            }
        }
        Err(e) => {
            println!("\x1b[31m\x1b[1m✗\x1b[0m Preferences unreadable: {}", e);
        }
    }

    // 4. Store health
    match SampleStore::open(&config.persistence.database_path).await {
        Ok(store) => {
            let samples = store.sample_count().await.unwrap_or(0);
            let calibrations = store.calibration_count().await.unwrap_or(0);
            println!(
                "\x1b[32m\x1b[1m✓\x1b[0m Store opened ({} samples, {} calibration versions).",
                samples, calibrations
            );
            match store.latest_calibration().await {
                Ok(Some(row)) => {
                    println!(
                        "  Last calibration: state {}, confidence {:.2}.",
                        row.state, row.confidence
                    );
                }
                Ok(None) => println!("  No calibration learned yet."),
                Err(e) => println!("\x1b[33m\x1b[1m! Warning:\x1b[0m {}", e),
            }
        }
        Err(e) => {
            println!("\x1b[31m\x1b[1m✗\x1b[0m Store open failed: {}", e);
        }
    }

    println!("\x1b[36m\x1b[1mCheck complete.\x1b[0m");
    Ok(())
}
