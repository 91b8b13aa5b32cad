//! Spatial autocorrelation statistics.

pub mod moran;

pub use moran::*;
