//! Turso-backed sample store.
//!
//! The store owns the database handle exclusively; the pipeline and the
//! HTTP layer reach it through one shared lock. All writes here are either
//! single appends or one transaction per batch.

use anyhow::{Context, Result};
use std::sync::Arc;
use turso::Database;

use super::schema::*;
use crate::autocal::CalibrationSnapshot;
use crate::sample::{self, PhysicsEvent, Regime, Sample, Status, Urgency};

/// Hard cap on rows returned by a range query, protecting device RAM.
pub const RANGE_QUERY_CAP: usize = 200;

#[derive(Clone)]
pub struct SampleStore {
    db: Arc<Database>,
}

impl SampleStore {
    /// Open or create a store at the given path.
    pub async fn open(db_path: &str) -> Result<Self> {
        let path = std::path::Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .with_context(|| format!("Failed to open database: {}", db_path))?;

        let store = Self { db: Arc::new(db) };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing).
    pub async fn open_memory() -> Result<Self> {
        let db = turso::Builder::new_local(":memory:")
            .build()
            .await
            .with_context(|| "Failed to open in-memory database")?;

        let store = Self { db: Arc::new(db) };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;

        // WAL with synchronous=NORMAL: fast batched writes, recoverable
        // after an interrupted commit.
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
        conn.execute("PRAGMA busy_timeout = 5000;", ()).await.ok();

        conn.execute_batch(INIT_SCHEMA)
            .await
            .with_context(|| "Failed to initialize database schema")?;

        conn.execute("DELETE FROM schema_info WHERE key = 'version'", ())
            .await?;
        conn.execute(
            "INSERT INTO schema_info (key, value) VALUES ('version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )
        .await?;

        Ok(())
    }

    // ─── Samples ─────────────────────────────────────────────────

    /// Write a batch of samples inside a single transaction.
    ///
    /// On any failure the transaction is rolled back and the caller keeps
    /// its in-RAM batch for retry on the next cadence.
    pub async fn write_batch(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let conn = self.db.connect()?;
        conn.execute("BEGIN", ())
            .await
            .with_context(|| "Failed to begin sample batch transaction")?;

        for s in samples {
            let insert = conn
                .execute(
                    INSERT_SAMPLE,
                    turso::params![
                        s.timestamp,
                        s.raw as i64,
                        s.temp_c,
                        s.theta,
                        s.theta_fc,
                        s.theta_refill,
                        s.psi_kpa,
                        s.aw_mm,
                        s.fraction_depleted,
                        s.drying_rate,
                        s.regime.as_str(),
                        s.status.as_str(),
                        s.urgency.as_str(),
                        s.confidence,
                        s.qc_valid as i64,
                        sample::join_flags(&s.qc_flags),
                        s.seq,
                    ],
                )
                .await;
            if let Err(e) = insert {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e).with_context(|| {
                    format!("Failed to insert sample at timestamp {}", s.timestamp)
                });
            }
        }

        conn.execute("COMMIT", ())
            .await
            .with_context(|| "Failed to commit sample batch")?;
        Ok(())
    }

    /// Most recent sample by timestamp.
    pub async fn latest_sample(&self) -> Result<Option<Sample>> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY timestamp DESC LIMIT 1"
        );
        let mut rows = conn.query(&sql, ()).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_sample(&row)?)),
            None => Ok(None),
        }
    }

    /// Samples in `[start, end]`, ascending, capped at [`RANGE_QUERY_CAP`].
    pub async fn samples_in_range(&self, start: i64, end: i64) -> Result<Vec<Sample>> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples \
             WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp ASC LIMIT ?3"
        );
        let mut rows = conn
            .query(&sql, turso::params![start, end, RANGE_QUERY_CAP as i64])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_sample(&row)?);
        }
        Ok(out)
    }

    /// The `n` most recent samples, newest first.
    pub async fn recent_samples(&self, n: usize) -> Result<Vec<Sample>> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY timestamp DESC LIMIT ?1"
        );
        let mut rows = conn.query(&sql, turso::params![n as i64]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_sample(&row)?);
        }
        Ok(out)
    }

    /// The `n` most recent samples in ascending order, for rebuilding the
    /// ring buffer on startup.
    pub async fn tail_samples(&self, n: usize) -> Result<Vec<Sample>> {
        let mut samples = self.recent_samples(n).await?;
        samples.reverse();
        Ok(samples)
    }

    pub async fn sample_count(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn.query("SELECT COUNT(*) FROM samples", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    /// Highest persisted write counter; 0 for an empty log. Seeds the
    /// in-memory counter so seq stays strictly increasing across restarts.
    pub async fn max_seq(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT COALESCE(MAX(seq), 0) FROM samples", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    /// Timestamp of the most recent persisted sample.
    pub async fn last_write_ts(&self) -> Result<Option<i64>> {
        let conn = self.db.connect()?;
        let mut rows = conn.query("SELECT MAX(timestamp) FROM samples", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?),
            None => Ok(None),
        }
    }

    /// QC-invalid samples since `ts`, for the diagnostics error counter.
    pub async fn invalid_samples_since(&self, ts: i64) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM samples WHERE qc_valid = 0 AND timestamp >= ?1",
                turso::params![ts],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    /// Maintenance hook for an age-based pruning collaborator. The core
    /// loop never calls this.
    pub async fn prune_older_than(&self, ts: i64) -> Result<u64> {
        let conn = self.db.connect()?;
        let deleted = conn
            .execute("DELETE FROM samples WHERE timestamp < ?1", turso::params![ts])
            .await?;
        Ok(deleted)
    }

    // ─── Calibration versions ────────────────────────────────────

    /// Append a calibration version. Versions are never modified.
    pub async fn append_calibration(&self, ts: i64, snap: &CalibrationSnapshot) -> Result<()> {
        let conn = self.db.connect()?;
        let params_json = snap.params.to_json().to_string();
        conn.execute(
            "INSERT INTO calibration \
             (timestamp, state, theta_fc, theta_refill, n_events, confidence, params_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            turso::params![
                ts,
                snap.state.as_str(),
                snap.theta_fc,
                snap.theta_refill,
                snap.n_events as i64,
                snap.confidence,
                params_json,
            ],
        )
        .await
        .with_context(|| "Failed to append calibration version")?;
        Ok(())
    }

    pub async fn latest_calibration(&self) -> Result<Option<CalibrationRow>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT version, timestamp, state, theta_fc, theta_refill, n_events, \
                 confidence, params_json FROM calibration ORDER BY version DESC LIMIT 1",
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(CalibrationRow {
                version: row.get::<i64>(0)?,
                timestamp: row.get::<i64>(1)?,
                state: row.get::<String>(2)?,
                theta_fc: row.get::<Option<f64>>(3)?,
                theta_refill: row.get::<Option<f64>>(4)?,
                n_events: row.get::<i64>(5)?,
                confidence: row.get::<f64>(6)?,
                params_json: row.get::<String>(7)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn calibration_count(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn.query("SELECT COUNT(*) FROM calibration", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    // ─── Events ──────────────────────────────────────────────────

    /// Append a detected physics episode. Events are never modified.
    pub async fn append_event(&self, event: &PhysicsEvent) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO events (ts_start, ts_end, event_type, delta_theta, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            turso::params![
                event.ts_start,
                event.ts_end,
                event.kind.as_str(),
                event.delta_theta,
                event.metadata.to_string(),
            ],
        )
        .await
        .with_context(|| "Failed to append event")?;
        Ok(())
    }

    /// The `n` most recent events, newest first.
    pub async fn recent_events(&self, n: usize) -> Result<Vec<EventRow>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, ts_start, ts_end, event_type, delta_theta, metadata \
                 FROM events ORDER BY id DESC LIMIT ?1",
                turso::params![n as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(EventRow {
                id: row.get::<i64>(0)?,
                ts_start: row.get::<i64>(1)?,
                ts_end: row.get::<i64>(2)?,
                event_type: row.get::<String>(3)?,
                delta_theta: row.get::<f64>(4)?,
                metadata: row.get::<String>(5)?,
            });
        }
        Ok(out)
    }

    pub async fn event_count(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn.query("SELECT COUNT(*) FROM events", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }
}

fn row_to_sample(row: &turso::Row) -> Result<Sample> {
    Ok(Sample {
        timestamp: row.get::<i64>(0)?,
        raw: row.get::<i64>(1)? as i32,
        temp_c: row.get::<f64>(2)?,
        theta: row.get::<f64>(3)?,
        theta_fc: row.get::<Option<f64>>(4)?,
        theta_refill: row.get::<Option<f64>>(5)?,
        psi_kpa: row.get::<f64>(6)?,
        aw_mm: row.get::<f64>(7)?,
        fraction_depleted: row.get::<f64>(8)?,
        drying_rate: row.get::<Option<f64>>(9)?,
        regime: Regime::parse(&row.get::<String>(10)?),
        status: Status::parse(&row.get::<String>(11)?),
        urgency: Urgency::parse(&row.get::<String>(12)?),
        confidence: row.get::<f64>(13)?,
        qc_valid: row.get::<i64>(14)? != 0,
        qc_flags: sample::parse_flags(&row.get::<String>(15)?),
        seq: row.get::<i64>(16)?,
    })
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::dynamics::DynamicsParams;
    use crate::autocal::CalState;
    use crate::sample::{EventKind, QcFlag};

    fn sample(ts: i64, seq: i64) -> Sample {
        Sample {
            timestamp: ts,
            raw: 650,
            temp_c: 22.0,
            theta: 0.25,
            theta_fc: Some(0.30),
            theta_refill: Some(0.21),
            psi_kpa: 33.0,
            aw_mm: 18.5,
            fraction_depleted: 0.35,
            drying_rate: Some(-0.0012),
            regime: Regime::Drydown,
            status: Status::Optimal,
            urgency: Urgency::Low,
            confidence: 0.55,
            qc_valid: true,
            qc_flags: vec![],
            seq,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let store = SampleStore::open_memory().await.unwrap();
        assert_eq!(store.sample_count().await.unwrap(), 0);
        assert_eq!(store.max_seq().await.unwrap(), 0);
        assert!(store.latest_sample().await.unwrap().is_none());
        assert!(store.latest_calibration().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_write_and_read_back() {
        let store = SampleStore::open_memory().await.unwrap();
        let batch: Vec<Sample> = (0..6).map(|i| sample(1000 + i * 900, i + 1)).collect();
        store.write_batch(&batch).await.unwrap();

        assert_eq!(store.sample_count().await.unwrap(), 6);
        let latest = store.latest_sample().await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 1000 + 5 * 900);
        assert_eq!(latest.status, Status::Optimal);
        assert_eq!(latest.regime, Regime::Drydown);
        assert_eq!(latest.theta_fc, Some(0.30));
        assert_eq!(latest.drying_rate, Some(-0.0012));
        assert_eq!(store.max_seq().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_aborts_batch() {
        let store = SampleStore::open_memory().await.unwrap();
        store.write_batch(&[sample(1000, 1)]).await.unwrap();

        // The second batch contains a duplicate timestamp; the whole batch
        // must be rolled back.
        let bad = vec![sample(2000, 2), sample(1000, 3)];
        assert!(store.write_batch(&bad).await.is_err());
        assert_eq!(store.sample_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_query_capped_and_ascending() {
        let store = SampleStore::open_memory().await.unwrap();
        for chunk in (0..300i64).collect::<Vec<_>>().chunks(50) {
            let batch: Vec<Sample> = chunk.iter().map(|&i| sample(i * 900, i + 1)).collect();
            store.write_batch(&batch).await.unwrap();
        }

        let rows = store.samples_in_range(0, i64::MAX).await.unwrap();
        assert_eq!(rows.len(), RANGE_QUERY_CAP);
        for pair in rows.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_qc_flags_round_trip() {
        let store = SampleStore::open_memory().await.unwrap();
        let mut s = sample(1000, 1);
        s.qc_valid = false;
        s.qc_flags = vec![QcFlag::Spike, QcFlag::TempOutOfRange];
        store.write_batch(&[s]).await.unwrap();

        let latest = store.latest_sample().await.unwrap().unwrap();
        assert!(!latest.qc_valid);
        assert_eq!(latest.qc_flags, vec![QcFlag::Spike, QcFlag::TempOutOfRange]);
        assert_eq!(store.invalid_samples_since(0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_calibration_versions_append_only() {
        let store = SampleStore::open_memory().await.unwrap();
        let snap = CalibrationSnapshot {
            state: CalState::FcEstimate,
            theta_fc: Some(0.31),
            theta_refill: Some(0.22),
            n_events: 2,
            confidence: 0.48,
            params: DynamicsParams {
                k_d: Some(0.08),
                k_u: None,
                beta: 1.0,
                theta_min: None,
            },
        };
        store.append_calibration(5000, &snap).await.unwrap();
        store.append_calibration(6000, &snap).await.unwrap();

        assert_eq!(store.calibration_count().await.unwrap(), 2);
        let row = store.latest_calibration().await.unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.timestamp, 6000);
        assert_eq!(row.state, "FC_ESTIMATE");
        assert_eq!(row.theta_fc, Some(0.31));
        let params = DynamicsParams::from_json(
            &serde_json::from_str(&row.params_json).unwrap(),
        );
        assert_eq!(params.k_d, Some(0.08));
    }

    #[tokio::test]
    async fn test_event_append_and_read() {
        let store = SampleStore::open_memory().await.unwrap();
        store
            .append_event(&PhysicsEvent {
                kind: EventKind::Wetting,
                ts_start: 100,
                ts_end: 7300,
                delta_theta: 0.06,
                metadata: serde_json::json!({"n_events": 1}),
            })
            .await
            .unwrap();

        let events = store.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "wetting");
        assert!((events[0].delta_theta - 0.06).abs() < 1e-12);
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("agriscan.db");
        let db_path_str = db_path.to_str().unwrap();

        {
            let store = SampleStore::open(db_path_str).await.unwrap();
            let batch: Vec<Sample> = (0..6).map(|i| sample(i * 900, i + 1)).collect();
            store.write_batch(&batch).await.unwrap();
        }

        {
            let store = SampleStore::open(db_path_str).await.unwrap();
            assert_eq!(store.sample_count().await.unwrap(), 6);
            assert_eq!(store.max_seq().await.unwrap(), 6);
            let tail = store.tail_samples(4).await.unwrap();
            assert_eq!(tail.len(), 4);
            assert_eq!(tail[0].timestamp, 2 * 900);
            assert_eq!(tail[3].timestamp, 5 * 900);
        }
    }

    #[tokio::test]
    async fn test_prune_is_a_maintenance_hook() {
        let store = SampleStore::open_memory().await.unwrap();
        let batch: Vec<Sample> = (0..10).map(|i| sample(i * 900, i + 1)).collect();
        store.write_batch(&batch).await.unwrap();

        let deleted = store.prune_older_than(5 * 900).await.unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(store.sample_count().await.unwrap(), 5);
    }
}
