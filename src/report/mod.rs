//! Reporting utilities: formatted terminal output for every pipeline stage.

pub mod format;

pub use format::*;
