//! `listing-spatial` library crate.
//!
//! The binary (`lspat`) is a thin wrapper around this library so that:
//!
//! - the statistics are testable without spawning processes
//! - pipeline stages can be reused on their own (Moran only, bandwidth only)
//! - the TUI refits through the same code as the batch report

pub mod app;
pub mod cli;
pub mod cluster;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod gwr;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod spatial;
pub mod stats;
pub mod tui;
