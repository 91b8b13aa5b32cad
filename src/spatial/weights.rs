//! Spatial weights over areas.
//!
//! Neighbor structure is kept as sorted adjacency lists over a symmetric
//! binary relation; the weights themselves are always row-standardized,
//! `w_ij = 1 / |N(i)|`.
//!
//! Contiguity is detected from shared geometry: vertices are snapped to a
//! grid of size `snap` and hashed. Queen neighbors share a snapped vertex;
//! rook neighbors share a snapped edge (both endpoints).

use std::collections::{BTreeSet, HashMap};

use geo::{CoordsIter, MultiPolygon, Point};
use nalgebra::{DMatrix, SymmetricEigen};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{IslandPolicy, WeightsKind};
use crate::error::AppError;
use crate::spatial::distance;

/// Default snapping precision for projected (metre) coordinates.
pub const DEFAULT_SNAP_PROJECTED: f64 = 1e-3;
/// Default snapping precision for geographic (degree) coordinates.
pub const DEFAULT_SNAP_GEOGRAPHIC: f64 = 1e-8;

/// Row-standardized spatial weights.
#[derive(Debug, Clone)]
pub struct SpatialWeights {
    pub kind: WeightsKind,
    neighbors: Vec<Vec<usize>>,
    /// Units that had no neighbors and were linked to their nearest centroid.
    pub linked_islands: Vec<usize>,
}

/// Cardinality summary for reports.
#[derive(Debug, Clone, Serialize)]
pub struct WeightsSummary {
    pub n: usize,
    pub min_neighbors: usize,
    pub max_neighbors: usize,
    pub mean_neighbors: f64,
    pub pct_nonzero: f64,
    pub linked_islands: usize,
}

/// Output of weight construction, including which input units survived.
#[derive(Debug, Clone)]
pub struct WeightsBuild {
    pub weights: SpatialWeights,
    /// Indices (into the input slices) of the units kept, in order.
    pub kept: Vec<usize>,
    /// Indices of islands removed under `IslandPolicy::Drop`.
    pub dropped_islands: Vec<usize>,
}

impl SpatialWeights {
    /// Build from raw (possibly asymmetric, possibly duplicated) neighbor lists.
    ///
    /// The relation is symmetrized by union and self-links are removed.
    pub fn from_neighbors(kind: WeightsKind, raw: Vec<Vec<usize>>) -> Self {
        let n = raw.len();
        let mut sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, list) in raw.iter().enumerate() {
            for &j in list {
                if j != i && j < n {
                    sets[i].insert(j);
                    sets[j].insert(i);
                }
            }
        }
        Self {
            kind,
            neighbors: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
            linked_islands: Vec::new(),
        }
    }

    pub fn n(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }

    pub fn cardinality(&self, i: usize) -> usize {
        self.neighbors[i].len()
    }

    pub fn islands(&self) -> Vec<usize> {
        (0..self.n()).filter(|&i| self.neighbors[i].is_empty()).collect()
    }

    /// Row-standardized weight `w_ij`.
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        let card = self.cardinality(i);
        if card == 0 || self.neighbors[i].binary_search(&j).is_err() {
            0.0
        } else {
            1.0 / card as f64
        }
    }

    /// Spatial lag `Wx`.
    pub fn lag(&self, x: &[f64]) -> Vec<f64> {
        self.neighbors
            .iter()
            .map(|nb| {
                if nb.is_empty() {
                    0.0
                } else {
                    nb.iter().map(|&j| x[j]).sum::<f64>() / nb.len() as f64
                }
            })
            .collect()
    }

    /// Dense row-standardized matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.n();
        let mut w = DMatrix::zeros(n, n);
        for (i, nb) in self.neighbors.iter().enumerate() {
            if nb.is_empty() {
                continue;
            }
            let v = 1.0 / nb.len() as f64;
            for &j in nb {
                w[(i, j)] = v;
            }
        }
        w
    }

    /// `S0 = Σ_ij w_ij` (equals the number of non-island units).
    pub fn s0(&self) -> f64 {
        self.neighbors.iter().filter(|nb| !nb.is_empty()).count() as f64
    }

    /// `S1 = ½ Σ_ij (w_ij + w_ji)²`.
    pub fn s1(&self) -> f64 {
        let mut s1 = 0.0;
        for (i, nb) in self.neighbors.iter().enumerate() {
            for &j in nb {
                let s = self.weight(i, j) + self.weight(j, i);
                s1 += s * s;
            }
        }
        0.5 * s1
    }

    /// `S2 = Σ_i (w_i. + w_.i)²`.
    pub fn s2(&self) -> f64 {
        let n = self.n();
        let mut col = vec![0.0; n];
        for (i, nb) in self.neighbors.iter().enumerate() {
            for &j in nb {
                col[j] += self.weight(i, j);
            }
        }
        (0..n)
            .map(|i| {
                let row = if self.neighbors[i].is_empty() { 0.0 } else { 1.0 };
                (row + col[i]).powi(2)
            })
            .sum()
    }

    /// Eigenvalues of the row-standardized W.
    ///
    /// `W = D⁻¹A` is similar to the symmetric `D^{-1/2} A D^{-1/2}`, so its
    /// spectrum is real and a symmetric eigensolver suffices.
    pub fn eigenvalues(&self) -> Vec<f64> {
        let n = self.n();
        let inv_sqrt: Vec<f64> = (0..n)
            .map(|i| {
                let c = self.cardinality(i);
                if c == 0 { 0.0 } else { 1.0 / (c as f64).sqrt() }
            })
            .collect();
        let mut m = DMatrix::zeros(n, n);
        for (i, nb) in self.neighbors.iter().enumerate() {
            for &j in nb {
                m[(i, j)] = inv_sqrt[i] * inv_sqrt[j];
            }
        }
        let eig = SymmetricEigen::new(m);
        let mut values: Vec<f64> = eig.eigenvalues.iter().copied().collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values
    }

    /// Restrict to a subset of units (re-indexed in `keep` order).
    pub fn subset(&self, keep: &[usize]) -> Self {
        let mut remap = vec![usize::MAX; self.n()];
        for (new, &old) in keep.iter().enumerate() {
            remap[old] = new;
        }
        let raw = keep
            .iter()
            .map(|&old| {
                self.neighbors[old]
                    .iter()
                    .filter_map(|&j| (remap[j] != usize::MAX).then_some(remap[j]))
                    .collect()
            })
            .collect();
        let mut out = Self::from_neighbors(self.kind, raw);
        out.linked_islands = self
            .linked_islands
            .iter()
            .filter_map(|&i| (remap[i] != usize::MAX).then_some(remap[i]))
            .collect();
        out
    }

    pub fn summary(&self) -> WeightsSummary {
        let n = self.n();
        let cards: Vec<usize> = (0..n).map(|i| self.cardinality(i)).collect();
        let total: usize = cards.iter().sum();
        WeightsSummary {
            n,
            min_neighbors: cards.iter().copied().min().unwrap_or(0),
            max_neighbors: cards.iter().copied().max().unwrap_or(0),
            mean_neighbors: if n == 0 { 0.0 } else { total as f64 / n as f64 },
            pct_nonzero: if n == 0 { 0.0 } else { 100.0 * total as f64 / (n * n) as f64 },
            linked_islands: self.linked_islands.len(),
        }
    }

    /// Histogram of neighbor counts: `(cardinality, units)` pairs, ascending.
    pub fn cardinality_histogram(&self) -> Vec<(usize, usize)> {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for i in 0..self.n() {
            *counts.entry(self.cardinality(i)).or_default() += 1;
        }
        let mut out: Vec<(usize, usize)> = counts.into_iter().collect();
        out.sort_unstable();
        out
    }
}

/// Build weights for a set of units and apply the island policy.
pub fn build_weights(
    geometries: &[&MultiPolygon<f64>],
    centroids: &[Point<f64>],
    kind: WeightsKind,
    knn_k: usize,
    snap: f64,
    geographic: bool,
    islands: IslandPolicy,
) -> Result<WeightsBuild, AppError> {
    let n = centroids.len();
    if geometries.len() != n {
        return Err(AppError::numeric("Geometry/centroid length mismatch in weights build."));
    }
    if n < 2 {
        return Err(AppError::data(format!("Spatial weights need at least 2 areas, got {n}.")));
    }

    let raw = match kind {
        WeightsKind::Queen => contiguity_neighbors(geometries, snap, false),
        WeightsKind::Rook => contiguity_neighbors(geometries, snap, true),
        WeightsKind::Knn => knn_neighbors(centroids, knn_k, geographic),
    };
    let mut weights = SpatialWeights::from_neighbors(kind, raw);

    let island_ids = weights.islands();
    if island_ids.is_empty() {
        debug!(n, kind = ?kind, "built spatial weights");
        return Ok(WeightsBuild {
            weights,
            kept: (0..n).collect(),
            dropped_islands: Vec::new(),
        });
    }

    warn!(count = island_ids.len(), policy = ?islands, "spatial weights contain islands");
    match islands {
        IslandPolicy::Error => Err(AppError::data(format!(
            "{} area(s) have no neighbors under {kind:?} contiguity; use --islands nearest|drop.",
            island_ids.len()
        ))),
        IslandPolicy::Drop => {
            let kept: Vec<usize> = (0..n).filter(|i| !island_ids.contains(i)).collect();
            if kept.len() < 2 {
                return Err(AppError::data("Too few connected areas remain after dropping islands."));
            }
            Ok(WeightsBuild {
                weights: weights.subset(&kept),
                kept,
                dropped_islands: island_ids,
            })
        }
        IslandPolicy::Nearest => {
            let mut raw = weights.neighbors.clone();
            for &i in &island_ids {
                if let Some(j) = nearest_other(centroids, i, geographic) {
                    raw[i].push(j);
                }
            }
            let mut linked = SpatialWeights::from_neighbors(kind, raw);
            linked.linked_islands = island_ids;
            weights = linked;
            Ok(WeightsBuild {
                weights,
                kept: (0..n).collect(),
                dropped_islands: Vec::new(),
            })
        }
    }
}

type SnapKey = (i64, i64);

fn snap_key(x: f64, y: f64, snap: f64) -> SnapKey {
    ((x / snap).round() as i64, (y / snap).round() as i64)
}

/// Queen (shared vertex) or rook (shared edge) neighbor lists.
pub fn contiguity_neighbors(geometries: &[&MultiPolygon<f64>], snap: f64, rook: bool) -> Vec<Vec<usize>> {
    let n = geometries.len();
    let mut buckets: HashMap<(SnapKey, SnapKey), Vec<usize>> = HashMap::new();

    for (idx, geom) in geometries.iter().enumerate() {
        for poly in geom.0.iter() {
            let rings = std::iter::once(poly.exterior()).chain(poly.interiors().iter());
            for ring in rings {
                let keys: Vec<SnapKey> = ring.coords_iter().map(|c| snap_key(c.x, c.y, snap)).collect();
                if rook {
                    for pair in keys.windows(2) {
                        if pair[0] == pair[1] {
                            continue;
                        }
                        let edge = if pair[0] <= pair[1] { (pair[0], pair[1]) } else { (pair[1], pair[0]) };
                        push_unique(buckets.entry(edge).or_default(), idx);
                    }
                } else {
                    for key in keys {
                        push_unique(buckets.entry((key, key)).or_default(), idx);
                    }
                }
            }
        }
    }

    let mut out = vec![Vec::new(); n];
    for members in buckets.values() {
        if members.len() < 2 {
            continue;
        }
        for &a in members {
            for &b in members {
                if a != b {
                    out[a].push(b);
                }
            }
        }
    }
    out
}

fn push_unique(list: &mut Vec<usize>, idx: usize) {
    if list.last() != Some(&idx) {
        list.push(idx);
    }
}

/// k nearest centroids for each unit (ties broken by index).
pub fn knn_neighbors(centroids: &[Point<f64>], k: usize, geographic: bool) -> Vec<Vec<usize>> {
    let n = centroids.len();
    (0..n)
        .map(|i| {
            let mut d: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (distance(centroids[i], centroids[j], geographic), j))
                .collect();
            d.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
            d.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

fn nearest_other(centroids: &[Point<f64>], i: usize, geographic: bool) -> Option<usize> {
    (0..centroids.len())
        .filter(|&j| j != i)
        .map(|j| (distance(centroids[i], centroids[j], geographic), j))
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, j)| j)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;

    /// `n x n` grid of unit squares, row-major from the bottom-left.
    pub(crate) fn grid(n: usize) -> (Vec<MultiPolygon<f64>>, Vec<Point<f64>>) {
        let mut geoms = Vec::new();
        let mut cents = Vec::new();
        for row in 0..n {
            for col in 0..n {
                let (x, y) = (col as f64, row as f64);
                geoms.push(MultiPolygon::new(vec![polygon![
                    (x: x, y: y),
                    (x: x + 1.0, y: y),
                    (x: x + 1.0, y: y + 1.0),
                    (x: x, y: y + 1.0),
                ]]));
                cents.push(Point::new(x + 0.5, y + 0.5));
            }
        }
        (geoms, cents)
    }

    pub(crate) fn grid_weights(n: usize, kind: WeightsKind) -> SpatialWeights {
        let (geoms, cents) = grid(n);
        let refs: Vec<&MultiPolygon<f64>> = geoms.iter().collect();
        build_weights(&refs, &cents, kind, 4, DEFAULT_SNAP_PROJECTED, false, IslandPolicy::Error)
            .unwrap()
            .weights
    }

    #[test]
    fn queen_grid_cardinalities() {
        let w = grid_weights(3, WeightsKind::Queen);
        assert_eq!(w.cardinality(4), 8);
        assert_eq!(w.cardinality(0), 3);
        assert_eq!(w.cardinality(1), 5);
    }

    #[test]
    fn rook_grid_cardinalities() {
        let w = grid_weights(3, WeightsKind::Rook);
        assert_eq!(w.cardinality(4), 4);
        assert_eq!(w.cardinality(0), 2);
        assert_eq!(w.neighbors(0), &[1, 3]);
    }

    #[test]
    fn weights_are_symmetric_and_row_standardized() {
        let w = grid_weights(4, WeightsKind::Queen);
        let dense = w.to_dense();
        for i in 0..w.n() {
            let row: f64 = dense.row(i).iter().sum();
            assert!((row - 1.0).abs() < 1e-12);
            for &j in w.neighbors(i) {
                assert!(w.neighbors(j).contains(&i));
            }
        }
        assert!((w.s0() - 16.0).abs() < 1e-12);
    }

    #[test]
    fn eigenvalues_are_bounded_by_one() {
        let w = grid_weights(3, WeightsKind::Rook);
        let eig = w.eigenvalues();
        assert_eq!(eig.len(), 9);
        assert!((eig[eig.len() - 1] - 1.0).abs() < 1e-9);
        assert!(eig[0] >= -1.0 - 1e-9);
    }

    #[test]
    fn islands_follow_policy() {
        let (mut geoms, mut cents) = grid(2);
        geoms.push(MultiPolygon::new(vec![polygon![
            (x: 10.0, y: 10.0),
            (x: 11.0, y: 10.0),
            (x: 11.0, y: 11.0),
            (x: 10.0, y: 11.0),
        ]]));
        cents.push(Point::new(10.5, 10.5));
        let refs: Vec<&MultiPolygon<f64>> = geoms.iter().collect();

        let err = build_weights(&refs, &cents, WeightsKind::Queen, 1, 1e-3, false, IslandPolicy::Error);
        assert!(err.is_err());

        let linked = build_weights(&refs, &cents, WeightsKind::Queen, 1, 1e-3, false, IslandPolicy::Nearest).unwrap();
        assert_eq!(linked.weights.linked_islands, vec![4]);
        assert_eq!(linked.weights.neighbors(4), &[3]);
        assert!(linked.weights.neighbors(3).contains(&4));

        let dropped = build_weights(&refs, &cents, WeightsKind::Queen, 1, 1e-3, false, IslandPolicy::Drop).unwrap();
        assert_eq!(dropped.kept, vec![0, 1, 2, 3]);
        assert_eq!(dropped.dropped_islands, vec![4]);
        assert_eq!(dropped.weights.n(), 4);
    }

    #[test]
    fn spatial_lag_averages_neighbors() {
        let w = grid_weights(3, WeightsKind::Rook);
        let x: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let lag = w.lag(&x);
        // Center (4) has rook neighbors 1, 3, 5, 7.
        assert!((lag[4] - 4.0).abs() < 1e-12);
        // Corner 0 has neighbors 1 and 3.
        assert!((lag[0] - 2.0).abs() < 1e-12);
    }
}
