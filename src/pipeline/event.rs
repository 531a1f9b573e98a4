use serde::Serialize;

use crate::autocal::CalState;
use crate::sample::PhysicsEvent;

/// Every notable action in the pipeline produces a typed `PipelineEvent`.
///
/// Physics events (wetting, drainage plateau, drydown fit) are appended to
/// the event log; the rest are logged for the operator and diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A detected physics episode to append to the event log.
    PhysicsEvent { event: PhysicsEvent },

    /// Calibration targets or fitted parameters changed; a new calibration
    /// version was persisted.
    CalibrationUpdated {
        state: String,
        theta_fc: Option<f64>,
        theta_refill: Option<f64>,
        confidence: f64,
    },

    /// The auto-calibration machine moved.
    StateChanged { from: String, to: String },

    /// Persistence fell behind and the oldest pending samples were dropped.
    PersistenceBackpressure { dropped: usize, pending: usize },

    /// A tick failed and was counted as lost.
    TickLost { reason: String },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::PhysicsEvent { .. } => "physics_event",
            PipelineEvent::CalibrationUpdated { .. } => "calibration_updated",
            PipelineEvent::StateChanged { .. } => "state_changed",
            PipelineEvent::PersistenceBackpressure { .. } => "persistence_backpressure",
            PipelineEvent::TickLost { .. } => "tick_lost",
        }
    }

    pub fn state_changed(from: CalState, to: CalState) -> Self {
        PipelineEvent::StateChanged {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }
}
