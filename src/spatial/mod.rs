//! Geometry side of the pipeline: reprojection, point-in-polygon join,
//! per-area aggregation and spatial weights.

pub mod aggregate;
pub mod crs;
pub mod join;
pub mod weights;

pub use aggregate::*;
pub use crs::*;
pub use join::*;
pub use weights::*;

use geo::{EuclideanDistance, HaversineDistance, Point};

/// Distance between two locations in metres (BNG) or great-circle metres (WGS84).
pub fn distance(a: Point<f64>, b: Point<f64>, geographic: bool) -> f64 {
    if geographic {
        a.haversine_distance(&b)
    } else {
        a.euclidean_distance(&b)
    }
}

/// Full pairwise distance matrix, row-major `n * n`.
pub fn distance_matrix(points: &[Point<f64>], geographic: bool) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distance(points[i], points[j], geographic);
            out[i][j] = d;
            out[j][i] = d;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_distance_is_euclidean() {
        let d = distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0), false);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn geographic_distance_is_metres() {
        // One degree of latitude is roughly 111 km.
        let d = distance(Point::new(0.0, 51.0), Point::new(0.0, 52.0), true);
        assert!((d - 111_195.0).abs() < 500.0, "got {d}");
    }
}
