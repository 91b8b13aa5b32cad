//! Geographically weighted regression.

pub mod bandwidth;
pub mod fit;
pub mod kernel;

pub use bandwidth::*;
pub use fit::*;
pub use kernel::*;
