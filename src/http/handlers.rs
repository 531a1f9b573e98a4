//! Request handlers for the local API.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::Response,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::{info, warn};

use super::{ApiError, ApiState};
use crate::pipeline::epoch_now;
use crate::sample::{EventKind, PhysicsEvent, Sample};
use crate::status::drainage_quality;

/// Confidence thresholds for the operator-facing calibration label.
const CONFIDENCE_LEARNING: f64 = 0.35;
const CONFIDENCE_CALIBRATING: f64 = 0.65;

// ─── GET /api/current ────────────────────────────────────────────

pub async fn handle_current(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let latest = {
        let snap = state.snapshot.read().await;
        snap.latest.clone()
    };
    // Before the first tick of this run, fall back to the persisted tail.
    let latest = match latest {
        Some(sample) => Some(sample),
        None => {
            let store = state.lock_store().await?;
            store.latest_sample().await?
        }
    };
    let Some(sample) = latest else {
        return Err(ApiError::NotFound("no samples yet".to_string()));
    };

    let prefs = state.prefs.read().await;
    let stage = prefs
        .days_after_planting(epoch_now())
        .and_then(|days| state.reference.stage_for(&prefs.crop, days))
        .map(|s| s.name.clone());

    Ok(Json(serde_json::json!({
        "timestamp": sample.timestamp,
        "theta": sample.theta,
        "psi_kpa": sample.psi_kpa,
        "status": sample.status,
        "urgency": sample.urgency,
        "confidence": sample.confidence,
        "theta_fc": sample.theta_fc,
        "theta_refill": sample.theta_refill,
        "stage": stage,
        "crop": prefs.crop,
    })))
}

// ─── GET /api/series ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    pub start: i64,
    pub end: i64,
}

pub async fn handle_series(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SeriesParams>,
) -> Result<Response, ApiError> {
    if params.end < params.start {
        return Err(ApiError::BadRequest("end must not precede start".to_string()));
    }

    let samples = {
        let store = state.lock_store().await?;
        store.samples_in_range(params.start, params.end).await?
    };

    // Serialize row by row into the body buffer; the range cap bounds the
    // allocation, and no intermediate DTO vector is built.
    let mut body = String::with_capacity(64 + samples.len() * 40);
    body.push('[');
    for (i, sample) in samples.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(&format!(
            "{{\"timestamp\":{},\"theta\":{}}}",
            sample.timestamp, sample.theta
        ));
    }
    body.push(']');

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// ─── GET /api/diagnostics ────────────────────────────────────────

pub async fn handle_diagnostics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = epoch_now();
    let snap = {
        let snap = state.snapshot.read().await;
        snap.clone()
    };

    let errors_24h = {
        let store = state.lock_store().await?;
        store.invalid_samples_since(now - 86_400).await?
    };

    let failure_rate = if snap.qc_total > 0 {
        100.0 * (snap.qc_total - snap.qc_pass) as f64 / snap.qc_total as f64
    } else {
        0.0
    };

    let (soil_status, temp_status) = sensor_health(snap.latest.as_ref());
    let storage_degraded = snap.pending_batch > 0 && snap.last_write_ts.is_none();

    let calibration_label = if snap.calibration.confidence < CONFIDENCE_LEARNING {
        "Learning"
    } else if snap.calibration.confidence < CONFIDENCE_CALIBRATING {
        "Calibrating"
    } else {
        "Calibrated"
    };

    Ok(Json(serde_json::json!({
        "storage": {
            "status": if storage_degraded { "degraded" } else { "ok" },
            "free_gb": disk_free_gb(&state.db_path),
            "last_write_seconds_ago": snap.last_write_ts.map(|ts| now - ts),
        },
        "sensors": {
            "soil_status": soil_status,
            "soil_last_raw": snap.last_raw,
            "temp_status": temp_status,
            "temp_last_c": snap.last_temp_c,
            "failure_rate_percent": failure_rate,
        },
        "system": {
            "uptime_hours": (now - snap.started_ts) as f64 / 3600.0,
            "memory_free_kb": memory_free_kb(),
            "last_reading_seconds_ago": snap.latest.as_ref().map(|s| now - s.timestamp),
        },
        "calibration": {
            "status": calibration_label,
            "confidence": snap.calibration.confidence,
            "events_captured": snap.calibration.n_events,
            "state": snap.calibration.state.as_str(),
            "drainage_quality": drainage_quality(snap.calibration.params.k_d),
        },
        "errors_24h": errors_24h,
    })))
}

fn sensor_health(latest: Option<&Sample>) -> (&'static str, &'static str) {
    use crate::sample::QcFlag;
    let Some(sample) = latest else {
        return ("unknown", "unknown");
    };
    let soil = if sample
        .qc_flags
        .iter()
        .any(|f| matches!(f, QcFlag::OutOfBounds | QcFlag::Spike | QcFlag::Stuck))
    {
        "warning"
    } else {
        "ok"
    };
    let temp = if sample.qc_flags.contains(&QcFlag::TempOutOfRange) {
        "warning"
    } else {
        "ok"
    };
    (soil, temp)
}

fn disk_free_gb(db_path: &std::path::Path) -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| db_path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .or_else(|| disks.list().first())
        .map(|d| d.available_space() as f64 / 1e9)
}

fn memory_free_kb() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory() / 1024
}

// ─── GET/POST /api/config ────────────────────────────────────────

pub async fn handle_get_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let prefs = state.prefs.read().await;
    serde_json::to_value(&*prefs)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn handle_post_config(
    State(state): State<Arc<ApiState>>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let serde_json::Value::Object(patch) = patch else {
        return Err(ApiError::BadRequest("expected a JSON object".to_string()));
    };

    let mut prefs = state.prefs.write().await;
    // Merge the patch over the current preferences so partial updates never
    // reset unmentioned fields.
    let mut merged = serde_json::to_value(&*prefs).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let serde_json::Value::Object(ref mut current) = merged {
        for (key, value) in patch {
            current.insert(key, value);
        }
    }
    let updated: crate::prefs::Preferences = serde_json::from_value(merged)
        .map_err(|e| ApiError::BadRequest(format!("invalid preferences: {e}")))?;

    updated
        .save(&state.prefs_path)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    *prefs = updated;
    info!("Preferences updated");

    Ok(Json(serde_json::json!({ "success": true })))
}

// ─── POST /api/log_event ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LogEventBody {
    pub ts_start: i64,
    pub ts_end: i64,
    pub event_type: String,
    #[serde(default)]
    pub delta_theta: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub async fn handle_log_event(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<LogEventBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(kind) = EventKind::parse(&body.event_type) else {
        return Err(ApiError::BadRequest(format!(
            "unknown event_type '{}'",
            body.event_type
        )));
    };
    if body.ts_end < body.ts_start {
        return Err(ApiError::BadRequest("ts_end must not precede ts_start".to_string()));
    }

    let event = PhysicsEvent {
        kind,
        ts_start: body.ts_start,
        ts_end: body.ts_end,
        delta_theta: body.delta_theta,
        metadata: if body.metadata.is_null() {
            serde_json::json!({"source": "operator"})
        } else {
            body.metadata
        },
    };

    let store = state.lock_store().await?;
    if let Err(e) = store.append_event(&event).await {
        warn!(error = %e, "Operator event append failed");
        return Err(ApiError::Internal(e.to_string()));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}
