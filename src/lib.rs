//! AgriScan: offline, on-device soil-water monitoring.
//!
//! The crate is a closed-loop estimation engine for a single low-power node:
//! a capacitive soil-moisture probe and a temperature probe are sampled at a
//! fixed cadence, interpreted through a soil-physics model, and auto-
//! calibrated to the installed soil and crop from observed wetting,
//! drainage, and drydown episodes. Decorated samples are batched into an
//! embedded store and served over a local HTTP API.
//!
//! Data flows bottom-up: [`sensor`] produces calibrated, QC-flagged VWC;
//! [`detect`] extracts events and the regime from the trailing [`ring`]
//! buffer; [`autocal`] learns the calibration targets and dynamics;
//! [`physics`] and [`status`] decorate each sample; [`pipeline`] drives the
//! whole path on the sample clock and [`persistence`] makes it durable for
//! the [`http`] read surface.

pub mod autocal;
pub mod commands;
pub mod detect;
pub mod http;
pub mod persistence;
pub mod physics;
pub mod pipeline;
pub mod prefs;
pub mod reference;
pub mod ring;
pub mod sample;
pub mod sensor;
pub mod status;
