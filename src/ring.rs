//! Bounded trailing window of recent samples.
//!
//! The pipeline owns one ring buffer sized for roughly 30 days at the
//! configured cadence (e.g. ~2880 points at 15-minute cadence). Slope fits,
//! plateau detection, and event extraction all read from this window; older
//! samples live only on disk.

use std::collections::VecDeque;

use crate::sample::Sample;

/// Window the ring buffer is sized to cover, in days.
pub const WINDOW_DAYS: u64 = 30;

/// Floor on the ring capacity so short commissioning cadences still keep a
/// useful history.
pub const MIN_CAPACITY: usize = 64;

pub struct RingBuffer {
    buf: VecDeque<Sample>,
    cap: usize,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(MIN_CAPACITY);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Capacity needed to hold [`WINDOW_DAYS`] of samples at the given cadence.
    pub fn capacity_for(sample_cadence_s: u64) -> usize {
        let window_s = WINDOW_DAYS * 24 * 3600;
        (window_s.div_ceil(sample_cadence_s.max(1)) as usize).max(MIN_CAPACITY)
    }

    /// Push a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: Sample) {
        if self.buf.len() >= self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&Sample> {
        self.buf.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.buf.iter()
    }

    /// Samples with `timestamp >= since`, oldest first.
    pub fn samples_since(&self, since: i64) -> impl Iterator<Item = &Sample> {
        self.buf.iter().filter(move |s| s.timestamp >= since)
    }

    /// The last `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &Sample> {
        let skip = self.buf.len().saturating_sub(n);
        self.buf.iter().skip(skip)
    }

    /// `(timestamp, theta)` pairs of QC-valid samples with
    /// `timestamp >= since`, oldest first. This is the view the detector and
    /// the parameter fits consume.
    pub fn good_points_since(&self, since: i64) -> Vec<(i64, f64)> {
        self.buf
            .iter()
            .filter(|s| s.qc_valid && s.timestamp >= since)
            .map(|s| (s.timestamp, s.theta))
            .collect()
    }

    /// Theta values of QC-valid samples with `timestamp >= since`.
    pub fn good_thetas_since(&self, since: i64) -> Vec<f64> {
        self.buf
            .iter()
            .filter(|s| s.qc_valid && s.timestamp >= since)
            .map(|s| s.theta)
            .collect()
    }
}
