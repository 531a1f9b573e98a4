//! Auto-calibration confidence scoring.
//!
//! A weighted sum of event coverage, estimate stability, QC pass rate, and
//! data volume, plus a bonus for how far the state machine has progressed.

/// Component weights: events, stability, QC rate, data progress.
const W_EVENT: f64 = 0.40;
const W_STABILITY: f64 = 0.25;
const W_QC: f64 = 0.20;
const W_DATA: f64 = 0.15;

/// Good samples needed for full data-progress credit.
const DATA_TARGET: f64 = 50.0;

/// Spread scale for the stability score, m3/m3.
const STABILITY_SCALE: f64 = 0.02;

/// Partial stability credit before enough candidates exist to measure spread.
const STABILITY_PARTIAL: f64 = 0.5;

pub struct ConfidenceInputs<'a> {
    pub n_events: u32,
    pub event_target: u32,
    /// Recent accepted field-capacity candidates, newest last.
    pub fc_history: &'a [f64],
    pub qc_pass: u64,
    pub qc_total: u64,
    /// Progression bonus from the state machine, 0..0.25.
    pub state_bonus: f64,
}

pub fn score(inputs: &ConfidenceInputs<'_>) -> f64 {
    let event_score = if inputs.event_target > 0 {
        (inputs.n_events as f64 / inputs.event_target as f64).min(1.0)
    } else {
        1.0
    };

    let stability_score = if inputs.fc_history.len() < 3 {
        STABILITY_PARTIAL
    } else {
        let n = inputs.fc_history.len() as f64;
        let mean = inputs.fc_history.iter().sum::<f64>() / n;
        let var = inputs.fc_history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (-var.sqrt() / STABILITY_SCALE).exp()
    };

    let qc_rate = if inputs.qc_total > 0 {
        inputs.qc_pass as f64 / inputs.qc_total as f64
    } else {
        0.0
    };

    let data_progress = (inputs.qc_total as f64 / DATA_TARGET).min(1.0);

    let c = W_EVENT * event_score
        + W_STABILITY * stability_score
        + W_QC * qc_rate
        + W_DATA * data_progress
        + inputs.state_bonus;
    c.clamp(0.0, 1.0)
}
