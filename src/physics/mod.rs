//! Soil physics: retention curve, conductivity, available water, and the
//! drainage/drydown dynamics used for short-horizon outlooks.

pub mod dynamics;
pub mod retention;
