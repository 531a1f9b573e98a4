//! The acquisition pipeline.
//!
//! One owned context drives the whole sensor-to-status path: probe read,
//! calibration, QC, detection, the auto-calibration tick, physics, status,
//! and batched persistence. The HTTP layer never touches the pipeline
//! directly; it reads an immutable [`PipelineSnapshot`] refreshed once per
//! tick and queries the store through its own lock.

pub mod config;
pub mod event;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::autocal::{AutoCalibrator, CalEffect, CalibrationSnapshot, CalState};
use crate::detect::{self, DetectorConfig};
use crate::persistence::SampleStore;
use crate::physics::dynamics::{self, DynamicsParams};
use crate::physics::retention::{self, VanGenuchten};
use crate::pipeline::config::AgriScanConfig;
use crate::pipeline::event::PipelineEvent;
use crate::ring::RingBuffer;
use crate::sample::Sample;
use crate::sensor::calibration::SensorCalibration;
use crate::sensor::qc::QcPolicy;
use crate::sensor::{Reading, SoilProbe};
use crate::status::StatusEngine;

/// Multiple of the batch size beyond which backpressure drops the oldest
/// pending samples.
const BACKPRESSURE_FACTOR: usize = 8;

/// Immutable view of the pipeline for HTTP handlers and diagnostics.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub latest: Option<Sample>,
    pub calibration: CalibrationSnapshot,
    pub last_raw: Option<i32>,
    pub last_temp_c: Option<f64>,
    pub qc_pass: u64,
    pub qc_total: u64,
    pub ticks: u64,
    pub ticks_missed: u64,
    pub last_write_ts: Option<i64>,
    pub pending_batch: usize,
    /// Day-ahead theta outlook under the fitted dynamics, when available.
    pub outlook_theta_24h: Option<f64>,
    pub started_ts: i64,
}

impl PipelineSnapshot {
    fn empty(calibration: CalibrationSnapshot, started_ts: i64) -> Self {
        Self {
            latest: None,
            calibration,
            last_raw: None,
            last_temp_c: None,
            qc_pass: 0,
            qc_total: 0,
            ticks: 0,
            ticks_missed: 0,
            last_write_ts: None,
            pending_batch: 0,
            outlook_theta_24h: None,
            started_ts,
        }
    }
}

pub struct Pipeline {
    config: Arc<AgriScanConfig>,
    probe: Box<dyn SoilProbe>,
    sensor_cal: SensorCalibration,
    qc: QcPolicy,
    vg: VanGenuchten,
    detector: DetectorConfig,
    autocal: AutoCalibrator,
    status: StatusEngine,
    ring: RingBuffer,
    pending: Vec<Sample>,
    store: Arc<Mutex<SampleStore>>,
    snapshot: Arc<RwLock<PipelineSnapshot>>,
    seq: i64,
    ticks: u64,
    ticks_missed: u64,
    last_tick_ts: Option<i64>,
    last_write_ts: Option<i64>,
}

impl Pipeline {
    /// Build the pipeline, rebuilding the ring buffer and calibration state
    /// from the tail of the store so a restart resumes where the last run
    /// left off.
    pub async fn bootstrap(
        config: AgriScanConfig,
        probe: Box<dyn SoilProbe>,
        store: SampleStore,
        seed: Option<(f64, f64)>,
        now_ts: i64,
    ) -> Result<Self> {
        let sensor_cal = config.sensor_calibration();
        let qc = config.qc_policy();
        let vg = config.van_genuchten();
        let detector = config.detector_config();
        let cal_cfg = config.cal_config();

        let cap = RingBuffer::capacity_for(config.sampling.sample_cadence_s);
        let mut ring = RingBuffer::new(cap);
        let tail = store
            .tail_samples(cap)
            .await
            .with_context(|| "Failed to read sample tail for ring rebuild")?;
        let restored = tail.len();
        for sample in tail {
            ring.push(sample);
        }

        let seq = store.max_seq().await?;
        let last_write_ts = store.last_write_ts().await?;

        let autocal = match store.latest_calibration().await? {
            Some(row) => {
                let snapshot = CalibrationSnapshot {
                    state: CalState::parse(&row.state),
                    theta_fc: row.theta_fc,
                    theta_refill: row.theta_refill,
                    n_events: row.n_events.max(0) as u32,
                    confidence: row.confidence,
                    params: DynamicsParams::from_json(
                        &serde_json::from_str(&row.params_json)
                            .unwrap_or(serde_json::Value::Null),
                    ),
                };
                let invalid = store.invalid_samples_since(0).await?;
                let good = (store.sample_count().await? - invalid).max(0) as u64;
                info!(
                    state = %row.state,
                    version = row.version,
                    "Calibration state restored"
                );
                AutoCalibrator::restore(cal_cfg, vg, seed, &snapshot, good)
            }
            None => AutoCalibrator::new(cal_cfg, vg, seed),
        };

        let status = match ring.latest() {
            Some(sample) => StatusEngine::with_last_status(
                config.calibration.refill_hysteresis,
                sample.status,
            ),
            None => StatusEngine::new(config.calibration.refill_hysteresis),
        };

        if restored > 0 {
            info!(samples = restored, seq, "Ring buffer rebuilt from store tail");
        }

        let snapshot = PipelineSnapshot::empty(autocal.snapshot(), now_ts);
        Ok(Self {
            config: Arc::new(config),
            probe,
            sensor_cal,
            qc,
            vg,
            detector,
            autocal,
            status,
            ring,
            pending: Vec::new(),
            store: Arc::new(Mutex::new(store)),
            snapshot: Arc::new(RwLock::new(snapshot)),
            seq,
            ticks: 0,
            ticks_missed: 0,
            last_tick_ts: None,
            last_write_ts,
        })
    }

    pub fn store_handle(&self) -> Arc<Mutex<SampleStore>> {
        self.store.clone()
    }

    pub fn snapshot_handle(&self) -> Arc<RwLock<PipelineSnapshot>> {
        self.snapshot.clone()
    }

    pub fn config(&self) -> Arc<AgriScanConfig> {
        self.config.clone()
    }

    /// Run the acquisition loop until cancelled, then flush once.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let cadence = self.config.sampling.sample_cadence_s;
        let mut interval = tokio::time::interval(Duration::from_secs(cadence));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        info!(cadence_s = cadence, "Acquisition loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let now = epoch_now();
                    // A tick never unwinds the loop; a failed tick is
                    // counted as lost and the cadence continues.
                    if let Err(e) = self.tick(now).await {
                        error!(error = %e, "Tick lost");
                        let event = PipelineEvent::TickLost { reason: e.to_string() };
                        debug!(event_type = event.event_type(), "Pipeline event");
                    }
                }
            }
        }

        // Graceful shutdown: one final flush, then no further writes.
        if let Err(e) = self.flush().await {
            warn!(error = %e, samples = self.pending.len(), "Final flush failed");
        }
        info!(ticks = self.ticks, "Acquisition loop stopped");
        Ok(())
    }

    /// One acquisition tick: read the probe and push the reading through
    /// the full processing path.
    pub async fn tick(&mut self, now_ts: i64) -> Result<()> {
        self.ticks += 1;
        if let Some(last) = self.last_tick_ts {
            let cadence = self.config.sampling.sample_cadence_s as i64;
            // The previous tick overran its period; the reading was queued
            // by the Burst interval, never silently dropped.
            if now_ts - last > cadence + cadence / 2 {
                self.ticks_missed += 1;
            }
        }
        self.last_tick_ts = Some(now_ts);

        let reading = self
            .probe
            .read(now_ts)
            .with_context(|| "Probe read failed")?;
        self.ingest(reading).await?;
        Ok(())
    }

    /// Process one reading end to end and hand the decorated sample to the
    /// batcher. Exposed for the scenario tests, which drive the pipeline
    /// with scripted readings instead of the wall clock.
    pub async fn ingest(&mut self, reading: Reading) -> Result<Sample> {
        let ts = reading.timestamp;

        // 1. Raw to VWC.
        let conv = self.sensor_cal.convert(reading.raw, reading.temp_c);

        // 2. Quality control against the trailing history.
        let qc_flags = self.qc.evaluate(
            reading.raw,
            conv.unclamped,
            conv.theta,
            reading.temp_c,
            ts,
            &self.ring,
        );
        let qc_valid = qc_flags.is_empty();

        // 3. Trailing slope and regime.
        let current = if qc_valid { Some((ts, conv.theta)) } else { None };
        let drying_rate =
            detect::drying_rate(&self.ring, current, ts, self.detector.slope_window_s);
        let regime = detect::classify_regime(
            drying_rate,
            conv.theta,
            self.autocal.theta_fc(),
            self.detector.s_min,
        );

        // 4. Calibration tick (QC-gated internally; counters still update).
        let effects = self.autocal.tick(
            &self.ring,
            &self.detector,
            ts,
            conv.theta,
            qc_valid,
            regime,
        );
        let calibration = self.autocal.snapshot();

        // 5. Physics: potential and available water against the targets in
        // effect at this timestamp.
        let psi_kpa = self.vg.psi_kpa_at_theta(conv.theta);
        let theta_pwp = self.vg.wilting_point();
        let fc_for_water = calibration.theta_fc.unwrap_or_else(|| self.vg.field_capacity());
        let water = retention::available_water(
            conv.theta,
            fc_for_water,
            theta_pwp,
            self.config.soil.root_depth_cm,
        );

        // 6. Status with hysteresis.
        let decision = self.status.evaluate(
            conv.theta,
            calibration.theta_fc,
            calibration.theta_refill,
            drying_rate,
        );

        self.seq += 1;
        let sample = Sample {
            timestamp: ts,
            raw: reading.raw,
            temp_c: reading.temp_c,
            theta: conv.theta,
            theta_fc: calibration.theta_fc,
            theta_refill: calibration.theta_refill,
            psi_kpa,
            aw_mm: water.aw_mm,
            fraction_depleted: water.fraction_depleted,
            drying_rate,
            regime,
            status: decision.status,
            urgency: decision.urgency,
            confidence: calibration.confidence,
            qc_valid,
            qc_flags,
            seq: self.seq,
        };

        debug!(
            theta = sample.theta,
            status = %sample.status.as_str(),
            regime = %sample.regime.as_str(),
            qc_valid = sample.qc_valid,
            "Sample processed"
        );

        self.ring.push(sample.clone());
        self.apply_effects(ts, &effects, &calibration).await;

        self.pending.push(sample.clone());
        if self.pending.len() >= self.config.persistence.batch_size {
            if let Err(e) = self.flush().await {
                warn!(error = %e, pending = self.pending.len(), "Batch flush failed, retaining samples");
                self.enforce_backpressure();
            }
        }

        self.refresh_snapshot(&calibration).await;
        Ok(sample)
    }

    /// Persist calibration versions and event rows produced by a tick.
    /// Store faults here are recoverable: they are logged and retried on the
    /// next effect, never failing the tick.
    async fn apply_effects(
        &mut self,
        ts: i64,
        effects: &[CalEffect],
        calibration: &CalibrationSnapshot,
    ) {
        for effect in effects {
            match effect {
                CalEffect::StateChanged { from, to } => {
                    let event = PipelineEvent::state_changed(*from, *to);
                    debug!(event_type = event.event_type(), "Pipeline event");
                }
                CalEffect::EventDetected(physics_event) => {
                    let store = self.store.lock().await;
                    if let Err(e) = store.append_event(physics_event).await {
                        warn!(error = %e, "Failed to append event row");
                    }
                }
                CalEffect::CalibrationUpdated => {
                    let store = self.store.lock().await;
                    if let Err(e) = store.append_calibration(ts, calibration).await {
                        warn!(error = %e, "Failed to append calibration version");
                    } else {
                        info!(
                            state = %calibration.state.as_str(),
                            theta_fc = ?calibration.theta_fc,
                            theta_refill = ?calibration.theta_refill,
                            confidence = calibration.confidence,
                            "Calibration version persisted"
                        );
                    }
                }
            }
        }
    }

    /// Write the pending batch in one transaction. On failure the batch is
    /// retained for retry on the next cadence.
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let store = self.store.lock().await;
        store.write_batch(&self.pending).await?;
        let flushed = self.pending.len();
        self.last_write_ts = self.pending.last().map(|s| s.timestamp);
        self.pending.clear();
        debug!(samples = flushed, "Batch flushed");
        Ok(())
    }

    /// Cap the pending batch when persistence lags. The ring buffer is
    /// unaffected; only the oldest unwritten rows are sacrificed.
    fn enforce_backpressure(&mut self) {
        let bound = self.config.persistence.batch_size * BACKPRESSURE_FACTOR;
        if self.pending.len() > bound {
            let dropped = self.pending.len() - bound;
            self.pending.drain(..dropped);
            let event = PipelineEvent::PersistenceBackpressure {
                dropped,
                pending: self.pending.len(),
            };
            warn!(
                event_type = event.event_type(),
                dropped,
                pending = self.pending.len(),
                "Persistence backpressure, oldest pending samples dropped"
            );
        }
    }

    async fn refresh_snapshot(&self, calibration: &CalibrationSnapshot) {
        let latest = self.ring.latest().cloned();
        let outlook = match (&latest, calibration.theta_fc) {
            (Some(sample), Some(fc)) => Some(dynamics::theta_after(
                sample.theta,
                fc,
                &calibration.params,
                24.0,
            )),
            _ => None,
        };
        let (qc_pass, qc_total) = self.autocal.qc_counters();

        let mut snap = self.snapshot.write().await;
        snap.latest = latest;
        snap.calibration = calibration.clone();
        snap.last_raw = self.ring.latest().map(|s| s.raw);
        snap.last_temp_c = self.ring.latest().map(|s| s.temp_c);
        snap.qc_pass = qc_pass;
        snap.qc_total = qc_total;
        snap.ticks = self.ticks;
        snap.ticks_missed = self.ticks_missed;
        snap.last_write_ts = self.last_write_ts;
        snap.pending_batch = self.pending.len();
        snap.outlook_theta_24h = outlook;
    }
}

/// Wall-clock seconds since epoch.
pub fn epoch_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────
