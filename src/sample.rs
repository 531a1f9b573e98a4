//! Canonical sample record shared by every pipeline component.
//!
//! A [`Sample`] is immutable once assembled: all derived fields reflect the
//! calibration state as of its timestamp. Persistence rows and HTTP JSON both
//! serialize through the serde representation defined here, so field names
//! never drift between layers.

use serde::{Deserialize, Serialize};

/// Qualitative regime of the soil-water balance at a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Wetting,
    Drainage,
    Drydown,
    Stable,
    Unknown,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Wetting => "wetting",
            Regime::Drainage => "drainage",
            Regime::Drydown => "drydown",
            Regime::Stable => "stable",
            Regime::Unknown => "unknown",
        }
    }

    /// Parse a stored label. Unrecognised labels map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "wetting" => Regime::Wetting,
            "drainage" => Regime::Drainage,
            "drydown" => Regime::Drydown,
            "stable" => Regime::Stable,
            _ => Regime::Unknown,
        }
    }
}

/// Irrigation status shown to the operator.
///
/// `Unknown` is reported honestly while the refill threshold is still being
/// learned; the dashboard renders it as "Calibrating".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Full,
    Optimal,
    Monitor,
    Refill,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Full => "FULL",
            Status::Optimal => "OPTIMAL",
            Status::Monitor => "MONITOR",
            Status::Refill => "REFILL",
            Status::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "FULL" => Status::Full,
            "OPTIMAL" => Status::Optimal,
            "MONITOR" => Status::Monitor,
            "REFILL" => Status::Refill,
            _ => Status::Unknown,
        }
    }
}

/// How urgently irrigation is recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    None,
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::None => "none",
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Urgency::Low,
            "medium" => Urgency::Medium,
            "high" => Urgency::High,
            _ => Urgency::None,
        }
    }
}

/// Quality-control flags attached to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QcFlag {
    OutOfBounds,
    Spike,
    Stuck,
    TempOutOfRange,
}

impl QcFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcFlag::OutOfBounds => "OUT_OF_BOUNDS",
            QcFlag::Spike => "SPIKE",
            QcFlag::Stuck => "STUCK",
            QcFlag::TempOutOfRange => "TEMP_OUT_OF_RANGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OUT_OF_BOUNDS" => Some(QcFlag::OutOfBounds),
            "SPIKE" => Some(QcFlag::Spike),
            "STUCK" => Some(QcFlag::Stuck),
            "TEMP_OUT_OF_RANGE" => Some(QcFlag::TempOutOfRange),
            _ => None,
        }
    }
}

/// Join a flag set into the comma-separated TEXT form used by the store.
pub fn join_flags(flags: &[QcFlag]) -> String {
    flags
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the comma-separated TEXT form back into a flag set.
pub fn parse_flags(s: &str) -> Vec<QcFlag> {
    s.split(',').filter_map(QcFlag::parse).collect()
}

/// One fully decorated sensor sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since epoch; unique key, strictly monotonic within the log.
    pub timestamp: i64,
    /// Raw ADC reading.
    pub raw: i32,
    /// Soil probe temperature at time of sample.
    pub temp_c: f64,
    /// Volumetric water content, m3/m3, in [0, 0.50].
    pub theta: f64,
    /// Field capacity target in effect at the moment of the sample.
    pub theta_fc: Option<f64>,
    /// Refill threshold in effect at the moment of the sample.
    pub theta_refill: Option<f64>,
    /// Matric potential magnitude, kPa (positive).
    pub psi_kpa: f64,
    /// Plant-available water depth, mm.
    pub aw_mm: f64,
    /// Fraction of total available water already used, [0, 1].
    pub fraction_depleted: f64,
    /// d(theta)/dt over a short trailing window, m3/m3 per hour, signed;
    /// positive means wetting. None with fewer than 3 points in the window.
    pub drying_rate: Option<f64>,
    pub regime: Regime,
    pub status: Status,
    pub urgency: Urgency,
    /// Auto-calibration confidence, [0, 1].
    pub confidence: f64,
    pub qc_valid: bool,
    pub qc_flags: Vec<QcFlag>,
    /// Monotonic counter assigned at write time.
    pub seq: i64,
}

/// Kind of a detected physics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Wetting,
    Drainage,
    Drydown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Wetting => "wetting",
            EventKind::Drainage => "drainage",
            EventKind::Drydown => "drydown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wetting" => Some(EventKind::Wetting),
            "drainage" => Some(EventKind::Drainage),
            "drydown" => Some(EventKind::Drydown),
            _ => None,
        }
    }
}

/// A detected wetting / drainage / drydown episode, appended on detection
/// and never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsEvent {
    pub kind: EventKind,
    pub ts_start: i64,
    pub ts_end: i64,
    pub delta_theta: f64,
    /// Opaque metadata (fit parameters, candidate values).
    pub metadata: serde_json::Value,
}
