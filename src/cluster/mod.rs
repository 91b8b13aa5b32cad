//! Clustering of local regression coefficients.

pub mod kmeans;

pub use kmeans::*;
