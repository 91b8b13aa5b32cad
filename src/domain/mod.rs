//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`Variable`, `CrsArg`, `WeightsKind`, `KernelKind`, ...)
//! - input records (`Listing`, `Area`) and the per-area aggregate (`AreaRecord`)
//! - the resolved run configuration (`AnalysisConfig`)

pub mod types;

pub use types::*;
