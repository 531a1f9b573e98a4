//! Quality-control scenarios: spike rejection and a stuck probe.

use agriscan::autocal::CalState;
use agriscan::persistence::SampleStore;
use agriscan::pipeline::config::AgriScanConfig;
use agriscan::pipeline::Pipeline;
use agriscan::sample::QcFlag;
use agriscan::sensor::{Reading, ScriptedProbe};

async fn pipeline_with_config(toml: &str) -> Pipeline {
    let config = AgriScanConfig::from_str(toml).unwrap();
    let store = SampleStore::open_memory().await.unwrap();
    Pipeline::bootstrap(config, Box::new(ScriptedProbe::new(vec![])), store, None, 0)
        .await
        .unwrap()
}

fn reading(ts: i64, raw: i32, temp_c: f64) -> Reading {
    Reading { raw, temp_c, timestamp: ts }
}

// ─── Scenario 4: spike rejection ─────────────────────────────────

#[tokio::test]
async fn test_spike_is_flagged_persisted_and_gated() {
    let mut pipeline = pipeline_with_config(
        r#"
[sampling]
sample_cadence_s = 900

[persistence]
batch_size = 1
"#,
    )
    .await;

    // A stable stream with last-bit noise.
    for i in 0..20i64 {
        let jitter = if i % 2 == 0 { 1 } else { -1 };
        let s = pipeline
            .ingest(reading((i + 1) * 900, 650 + jitter, 22.0))
            .await
            .unwrap();
        assert!(s.qc_valid);
    }

    let state_before = pipeline.snapshot_handle().read().await.calibration.state;
    let (pass_before, total_before) = {
        let snap = pipeline.snapshot_handle().read().await.clone();
        (snap.qc_pass, snap.qc_total)
    };

    // One absurd reading.
    let spike = pipeline.ingest(reading(21 * 900, 50, 22.0)).await.unwrap();
    assert!(!spike.qc_valid);
    assert!(
        spike.qc_flags.contains(&QcFlag::Spike)
            || spike.qc_flags.contains(&QcFlag::OutOfBounds),
        "flags: {:?}",
        spike.qc_flags
    );

    // Calibration state untouched, counters advanced.
    let snap = pipeline.snapshot_handle().read().await.clone();
    assert_eq!(snap.calibration.state, state_before);
    assert_eq!(snap.qc_pass, pass_before);
    assert_eq!(snap.qc_total, total_before + 1);

    // The flagged sample is still persisted.
    let store = pipeline.store_handle();
    let store = store.lock().await;
    let latest = store.latest_sample().await.unwrap().unwrap();
    assert_eq!(latest.timestamp, 21 * 900);
    assert!(!latest.qc_valid);
}

// ─── Scenario 5: stuck sensor ────────────────────────────────────

#[tokio::test]
async fn test_stuck_sensor_halts_learning() {
    let mut pipeline = pipeline_with_config(
        r#"
[sampling]
sample_cadence_s = 900

[persistence]
batch_size = 6
"#,
    )
    .await;

    // 24 hours of exactly raw 600.
    let mut first_stuck_at = None;
    let mut confidence_at_stuck = None;
    for i in 0..96i64 {
        let s = pipeline.ingest(reading((i + 1) * 900, 600, 22.0)).await.unwrap();
        if s.qc_flags.contains(&QcFlag::Stuck) && first_stuck_at.is_none() {
            first_stuck_at = Some(i + 1);
            confidence_at_stuck = Some(s.confidence);
        }
    }

    // The 10th identical sample trips the flag.
    assert_eq!(first_stuck_at, Some(10));

    // Calibration never leaves INIT and confidence does not rise while the
    // probe is stuck.
    let snap = pipeline.snapshot_handle().read().await.clone();
    assert_eq!(snap.calibration.state, CalState::Init);
    assert!(snap.calibration.confidence <= confidence_at_stuck.unwrap() + 1e-9);

    // Diagnostics counters see the failure rate.
    assert!(snap.qc_total > snap.qc_pass);
    let failure_rate = (snap.qc_total - snap.qc_pass) as f64 / snap.qc_total as f64;
    assert!(failure_rate > 0.85, "failure rate {failure_rate}");
}

// ─── Temperature probe disconnect ────────────────────────────────

#[tokio::test]
async fn test_temp_disconnect_sentinel_is_flagged() {
    let mut pipeline = pipeline_with_config(
        r#"
[sampling]
sample_cadence_s = 900
"#,
    )
    .await;

    let s = pipeline
        .ingest(reading(900, 650, agriscan::sensor::TEMP_DISCONNECT_C))
        .await
        .unwrap();
    assert!(!s.qc_valid);
    assert!(s.qc_flags.contains(&QcFlag::TempOutOfRange));
}
