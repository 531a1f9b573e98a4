//! Property-based checks of the universal invariants.

use proptest::prelude::*;

use agriscan::autocal::{AutoCalibrator, CalConfig};
use agriscan::detect::DetectorConfig;
use agriscan::physics::retention::{available_water, VanGenuchten, LOAM};
use agriscan::ring::RingBuffer;
use agriscan::sample::{self, QcFlag, Regime, Status};
use agriscan::sensor::calibration::SensorCalibration;
use agriscan::status::{decide, StatusEngine};

proptest! {
    // Raw-to-VWC conversion always lands in the physical range, whatever
    // the probe reports.
    #[test]
    fn prop_conversion_stays_in_bounds(raw in -10_000i32..10_000, temp in -40.0f64..80.0) {
        let cal = SensorCalibration::default();
        let conv = cal.convert(raw, temp);
        prop_assert!(conv.theta >= 0.0);
        prop_assert!(conv.theta <= 0.50);
    }

    // Retention round trip: psi(theta) inverts back within 1e-4 across the
    // open interval.
    #[test]
    fn prop_van_genuchten_round_trip(frac in 0.01f64..0.99) {
        let theta = LOAM.theta_r + 0.002 + (LOAM.theta_s - LOAM.theta_r - 0.004) * frac;
        let psi = LOAM.psi_cm_at_theta(theta);
        prop_assert!(psi > 0.0);
        let back = LOAM.theta_at_psi_cm(psi);
        prop_assert!((back - theta).abs() < 1e-4);
    }

    // Matric potential magnitude is positive for any unsaturated theta.
    #[test]
    fn prop_psi_positive_for_unsaturated(theta in 0.0f64..0.50) {
        let vg = VanGenuchten::default();
        if theta < vg.theta_s {
            prop_assert!(vg.psi_kpa_at_theta(theta) > 0.0);
        }
    }

    // Available-water accounting keeps the depleted fraction inside [0, 1]
    // for any physically ordered inputs.
    #[test]
    fn prop_fraction_depleted_in_unit_interval(
        theta in 0.0f64..0.50,
        pwp in 0.02f64..0.20,
        span in 0.01f64..0.30,
        depth in 5.0f64..100.0,
    ) {
        let fc = pwp + span;
        let water = available_water(theta, fc, pwp, depth);
        prop_assert!(water.fraction_depleted >= 0.0);
        prop_assert!(water.fraction_depleted <= 1.0);
        prop_assert!(water.aw_mm >= 0.0);
        prop_assert!(water.taw_mm >= 0.0);
    }

    // The status decision is a pure function of its inputs.
    #[test]
    fn prop_status_is_deterministic(
        theta in 0.0f64..0.50,
        fc in 0.05f64..0.45,
        refill_frac in 0.1f64..1.0,
        rate in -0.01f64..0.01,
        last in 0usize..5,
    ) {
        let refill = fc * refill_frac;
        let last_status = [
            Status::Full,
            Status::Optimal,
            Status::Monitor,
            Status::Refill,
            Status::Unknown,
        ][last];
        let a = decide(theta, Some(fc), Some(refill), Some(rate), last_status, 0.01);
        let b = decide(theta, Some(fc), Some(refill), Some(rate), last_status, 0.01);
        prop_assert_eq!(a, b);
    }

    // Hysteresis: once REFILL is entered, no oscillation inside the band
    // around the threshold can leave it.
    #[test]
    fn prop_refill_does_not_flap_inside_band(offsets in proptest::collection::vec(-0.009f64..0.009, 1..40)) {
        let fc = 0.30;
        let refill = 0.20;
        let mut engine = StatusEngine::new(0.01);
        let entry = engine.evaluate(refill - 0.05, Some(fc), Some(refill), Some(-0.001));
        prop_assert_eq!(entry.status, Status::Refill);
        for off in offsets {
            let d = engine.evaluate(refill + off, Some(fc), Some(refill), Some(0.0));
            prop_assert_eq!(d.status, Status::Refill);
        }
        // Clearing the band is the only way out.
        let out = engine.evaluate(refill + 0.02, Some(fc), Some(refill), Some(0.0));
        prop_assert_ne!(out.status, Status::Refill);
    }

    // QC gating: a run of invalid samples never moves the calibration state
    // or the learned targets.
    #[test]
    fn prop_invalid_samples_never_advance_calibration(
        thetas in proptest::collection::vec(0.0f64..0.50, 1..60),
    ) {
        let mut cal = AutoCalibrator::new(CalConfig::new(true), VanGenuchten::default(), None);
        let ring = RingBuffer::new(64);
        let det = DetectorConfig::default();

        let before = cal.snapshot();
        for (i, theta) in thetas.iter().enumerate() {
            let effects = cal.tick(&ring, &det, (i as i64 + 1) * 900, *theta, false, Regime::Unknown);
            prop_assert!(effects.is_empty());
        }
        let after = cal.snapshot();
        prop_assert_eq!(before.state, after.state);
        prop_assert_eq!(before.theta_fc, after.theta_fc);
        prop_assert_eq!(before.theta_refill, after.theta_refill);
    }

    // Flag sets survive the store's TEXT encoding.
    #[test]
    fn prop_qc_flags_round_trip(mask in 0u8..16) {
        let mut flags = Vec::new();
        if mask & 1 != 0 { flags.push(QcFlag::OutOfBounds); }
        if mask & 2 != 0 { flags.push(QcFlag::Spike); }
        if mask & 4 != 0 { flags.push(QcFlag::Stuck); }
        if mask & 8 != 0 { flags.push(QcFlag::TempOutOfRange); }
        let joined = sample::join_flags(&flags);
        prop_assert_eq!(sample::parse_flags(&joined), flags);
    }

    // Calibration snapshots keep refill at or below field capacity.
    #[test]
    fn prop_refill_never_exceeds_fc(n_flat in 10usize..40) {
        let mut cal = AutoCalibrator::new(CalConfig::new(true), VanGenuchten::default(), None);
        let mut ring = RingBuffer::new(4096);
        let det = DetectorConfig::default();
        for i in 0..n_flat {
            let ts = (i as i64 + 1) * 900;
            cal.tick(&ring, &det, ts, 0.25, true, Regime::Stable);
            ring.push(flat_sample(ts, 0.25));
        }
        let snap = cal.snapshot();
        if let (Some(fc), Some(refill)) = (snap.theta_fc, snap.theta_refill) {
            prop_assert!(refill <= fc + 1e-12);
        }
        prop_assert!(snap.confidence >= 0.0 && snap.confidence <= 1.0);
    }
}

fn flat_sample(ts: i64, theta: f64) -> agriscan::sample::Sample {
    agriscan::sample::Sample {
        timestamp: ts,
        raw: 650,
        temp_c: 22.0,
        theta,
        theta_fc: None,
        theta_refill: None,
        psi_kpa: 33.0,
        aw_mm: 0.0,
        fraction_depleted: 0.0,
        drying_rate: None,
        regime: Regime::Stable,
        status: Status::Unknown,
        urgency: agriscan::sample::Urgency::None,
        confidence: 0.0,
        qc_valid: true,
        qc_flags: vec![],
        seq: ts,
    }
}
