//! Numerical building blocks: least squares, distributions, 1-D optimizers
//! and summary statistics.

pub mod dist;
pub mod ols;
pub mod optimize;
pub mod summary;

pub use dist::*;
pub use ols::*;
pub use optimize::*;
pub use summary::*;
