//! Input/output helpers.
//!
//! - listing CSV ingest + validation (`listings`)
//! - polygon shapefile ingest (`boundaries`)
//! - result exports (CSV/JSON) (`export`)

pub mod boundaries;
pub mod export;
pub mod listings;

pub use boundaries::*;
pub use export::*;
pub use listings::*;
