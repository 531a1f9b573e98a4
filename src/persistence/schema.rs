//! Database schema definitions and row types for the sample store.

// ─── Schema Constants ───────────────────────────────────────────

/// Schema version — bump when changing table structure.
pub(crate) const SCHEMA_VERSION: u32 = 1;

/// SQL statements to initialize the database schema.
pub(crate) const INIT_SCHEMA: &str = r#"
-- Decorated sample log (append-only, keyed by timestamp)
CREATE TABLE IF NOT EXISTS samples (
    timestamp         INTEGER PRIMARY KEY,
    raw               INTEGER NOT NULL,
    temp_c            REAL NOT NULL,
    theta             REAL NOT NULL,
    theta_fc          REAL,
    theta_refill      REAL,
    psi_kpa           REAL NOT NULL,
    aw_mm             REAL NOT NULL,
    fraction_depleted REAL NOT NULL,
    drying_rate       REAL,
    regime            TEXT NOT NULL,
    status            TEXT NOT NULL,
    urgency           TEXT NOT NULL,
    confidence        REAL NOT NULL,
    qc_valid          INTEGER NOT NULL,
    qc_flags          TEXT NOT NULL DEFAULT '',
    seq               INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp);

-- Calibration versions (append-only)
CREATE TABLE IF NOT EXISTS calibration (
    version      INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp    INTEGER NOT NULL,
    state        TEXT NOT NULL,
    theta_fc     REAL,
    theta_refill REAL,
    n_events     INTEGER NOT NULL,
    confidence   REAL NOT NULL,
    params_json  TEXT NOT NULL DEFAULT '{}'
);

-- Detected physics episodes (append-only)
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_start    INTEGER NOT NULL,
    ts_end      INTEGER NOT NULL,
    event_type  TEXT NOT NULL,
    delta_theta REAL NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}'
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub(crate) const INSERT_SAMPLE: &str = "INSERT INTO samples \
    (timestamp, raw, temp_c, theta, theta_fc, theta_refill, psi_kpa, aw_mm, \
     fraction_depleted, drying_rate, regime, status, urgency, confidence, \
     qc_valid, qc_flags, seq) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

pub(crate) const SAMPLE_COLUMNS: &str = "timestamp, raw, temp_c, theta, theta_fc, \
    theta_refill, psi_kpa, aw_mm, fraction_depleted, drying_rate, regime, status, \
    urgency, confidence, qc_valid, qc_flags, seq";

// ─── Row Types ───────────────────────────────────────────────────

/// A row from the `calibration` table.
#[derive(Debug, Clone)]
pub struct CalibrationRow {
    pub version: i64,
    pub timestamp: i64,
    pub state: String,
    pub theta_fc: Option<f64>,
    pub theta_refill: Option<f64>,
    pub n_events: i64,
    pub confidence: f64,
    pub params_json: String,
}

/// A row from the `events` table.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub ts_start: i64,
    pub ts_end: i64,
    pub event_type: String,
    pub delta_theta: f64,
    pub metadata: String,
}
