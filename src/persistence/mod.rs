//! Durable storage for samples, calibration versions, and events.
//!
//! One embedded store file holds the three append-only tables. Samples are
//! written in batched transactions; journaling is WAL with
//! `synchronous=NORMAL` so an interrupted commit recovers cleanly on reopen.

pub mod schema;
pub mod store;

pub use schema::{CalibrationRow, EventRow};
pub use store::SampleStore;
