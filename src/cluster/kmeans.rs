//! k-means with k-means++ seeding, restarts and silhouette scoring.

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::math::standardize_in_place;

#[derive(Debug, Clone, Copy)]
pub struct KMeansOptions {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KMeansResult {
    pub k: usize,
    pub labels: Vec<usize>,
    /// Centroids in the (possibly standardized) clustering space.
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
    pub sizes: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ElbowRow {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    /// Mean of each input column over members, in input units.
    pub means: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    pub names: Vec<String>,
    pub standardized: bool,
    pub kmeans: KMeansResult,
    pub silhouette: f64,
    pub profiles: Vec<ClusterProfile>,
    /// Inertia/silhouette per k when a range scan was requested.
    pub elbow: Vec<ElbowRow>,
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest centroid; ties go to the lowest index.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = sq_dist(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn kmeans_plus_plus(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut centroids = vec![rows[rng.gen_range(0..n)].clone()];
    let mut d2: Vec<f64> = rows.iter().map(|r| sq_dist(r, &centroids[0])).collect();
    while centroids.len() < k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.gen_range(0.0..total);
            let mut acc = 0.0;
            let mut chosen = n - 1;
            for (i, d) in d2.iter().enumerate() {
                acc += d;
                if acc > target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        centroids.push(rows[pick].clone());
        for (i, r) in rows.iter().enumerate() {
            d2[i] = d2[i].min(sq_dist(r, &centroids[centroids.len() - 1]));
        }
    }
    centroids
}

fn lloyd(rows: &[Vec<f64>], k: usize, max_iter: usize, rng: &mut StdRng) -> KMeansResult {
    let n = rows.len();
    let dim = rows[0].len();
    let mut centroids = kmeans_plus_plus(rows, k, rng);
    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;

    for _ in 0..max_iter {
        iterations += 1;
        let mut changed = false;
        for (i, r) in rows.iter().enumerate() {
            let (c, _) = nearest(r, &centroids);
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, r) in rows.iter().enumerate() {
            counts[labels[i]] += 1;
            for (s, v) in sums[labels[i]].iter_mut().zip(r) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            }
        }

        // Reseed empty clusters with the point farthest from its centroid.
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let far = (0..n)
                .filter(|&i| counts[labels[i]] > 1)
                .max_by(|&a, &b| {
                    sq_dist(&rows[a], &centroids[labels[a]]).total_cmp(&sq_dist(&rows[b], &centroids[labels[b]]))
                });
            if let Some(i) = far {
                counts[labels[i]] -= 1;
                labels[i] = c;
                counts[c] = 1;
                centroids[c] = rows[i].clone();
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    let inertia = rows.iter().zip(&labels).map(|(r, &c)| sq_dist(r, &centroids[c])).sum();
    let mut sizes = vec![0; k];
    for &l in &labels {
        sizes[l] += 1;
    }
    KMeansResult {
        k,
        labels,
        centroids,
        inertia,
        iterations,
        sizes,
    }
}

/// Best of `n_init` runs (lowest inertia). Restart `r` draws from
/// `StdRng::seed_from_u64(seed + r)`, so results do not depend on scheduling.
pub fn kmeans(rows: &[Vec<f64>], opts: &KMeansOptions) -> Result<KMeansResult, AppError> {
    let n = rows.len();
    if opts.k < 1 {
        return Err(AppError::input("k-means needs k >= 1."));
    }
    if n < opts.k {
        return Err(AppError::data(format!("k-means with k={} needs at least {} rows, got {n}.", opts.k, opts.k)));
    }
    let dim = rows[0].len();
    if dim == 0 || rows.iter().any(|r| r.len() != dim || r.iter().any(|v| !v.is_finite())) {
        return Err(AppError::numeric("k-means input must be a rectangular, finite matrix."));
    }

    let runs: Vec<KMeansResult> = (0..opts.n_init.max(1))
        .into_par_iter()
        .map(|r| {
            let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(r as u64));
            lloyd(rows, opts.k, opts.max_iter, &mut rng)
        })
        .collect();

    let mut best: Option<KMeansResult> = None;
    for run in runs {
        if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    let best = best.ok_or_else(|| AppError::numeric("k-means produced no runs."))?;
    debug!(k = opts.k, inertia = best.inertia, iterations = best.iterations, "k-means done");
    Ok(best)
}

/// Mean silhouette width; singletons score 0.
pub fn silhouette(rows: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    let n = rows.len();
    if k < 2 || n < 2 {
        return f64::NAN;
    }
    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut sum = vec![0.0; k];
            let mut cnt = vec![0usize; k];
            for j in 0..n {
                if i == j {
                    continue;
                }
                sum[labels[j]] += sq_dist(&rows[i], &rows[j]).sqrt();
                cnt[labels[j]] += 1;
            }
            let own = labels[i];
            if cnt[own] == 0 {
                return 0.0;
            }
            let a = sum[own] / cnt[own] as f64;
            let b = (0..k)
                .filter(|&c| c != own && cnt[c] > 0)
                .map(|c| sum[c] / cnt[c] as f64)
                .fold(f64::INFINITY, f64::min);
            if !b.is_finite() {
                return 0.0;
            }
            let m = a.max(b);
            if m > 0.0 { (b - a) / m } else { 0.0 }
        })
        .sum();
    total / n as f64
}

/// Run k-means for every k in `k_min..=k_max`.
pub fn scan_k(rows: &[Vec<f64>], k_min: usize, k_max: usize, opts: &KMeansOptions) -> Result<Vec<ElbowRow>, AppError> {
    let k_max = k_max.min(rows.len().saturating_sub(1));
    let mut out = Vec::new();
    for k in k_min..=k_max {
        let fit = kmeans(rows, &KMeansOptions { k, ..*opts })?;
        out.push(ElbowRow {
            k,
            inertia: fit.inertia,
            silhouette: silhouette(rows, &fit.labels, k),
        });
    }
    Ok(out)
}

/// Per-cluster size and column means of `raw` (unstandardized) rows.
pub fn cluster_profiles(raw: &[Vec<f64>], labels: &[usize], k: usize) -> Vec<ClusterProfile> {
    let dim = raw.first().map_or(0, |r| r.len());
    let mut sums = vec![vec![0.0; dim]; k];
    let mut sizes = vec![0usize; k];
    for (r, &l) in raw.iter().zip(labels) {
        sizes[l] += 1;
        for (s, v) in sums[l].iter_mut().zip(r) {
            *s += v;
        }
    }
    (0..k)
        .map(|c| ClusterProfile {
            cluster: c,
            size: sizes[c],
            means: sums[c]
                .iter()
                .map(|s| if sizes[c] > 0 { s / sizes[c] as f64 } else { f64::NAN })
                .collect(),
        })
        .collect()
}

/// Cluster locations by the given columns.
///
/// `columns[j][i]` is column `j` at location `i`. Columns are z-scored first
/// when `standardize` is set; constant columns become zero.
pub fn cluster_columns(
    names: Vec<String>,
    columns: &[Vec<f64>],
    standardize: bool,
    opts: &KMeansOptions,
    k_max: usize,
) -> Result<ClusterResult, AppError> {
    let n = columns.first().map_or(0, |c| c.len());
    let raw: Vec<Vec<f64>> = (0..n).map(|i| columns.iter().map(|c| c[i]).collect()).collect();

    let rows = if standardize {
        let mut scaled: Vec<Vec<f64>> = columns.to_vec();
        for col in scaled.iter_mut() {
            standardize_in_place(col);
        }
        (0..n).map(|i| scaled.iter().map(|c| c[i]).collect()).collect()
    } else {
        raw.clone()
    };

    let fit = kmeans(&rows, opts)?;
    let sil = silhouette(&rows, &fit.labels, fit.k);
    let elbow = if k_max > 0 { scan_k(&rows, 2, k_max, opts)? } else { Vec::new() };
    let profiles = cluster_profiles(&raw, &fit.labels, fit.k);
    info!(k = fit.k, inertia = fit.inertia, silhouette = sil, "clustered local coefficients");

    Ok(ClusterResult {
        names,
        standardized: standardize,
        kmeans: fit,
        silhouette: sil,
        profiles,
        elbow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f64>> {
        let centres = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let mut rows = Vec::new();
        for (cx, cy) in centres {
            for i in 0..15 {
                let a = i as f64 * 0.7;
                rows.push(vec![cx + 0.5 * a.cos(), cy + 0.5 * a.sin()]);
            }
        }
        rows
    }

    fn opts(k: usize) -> KMeansOptions {
        KMeansOptions {
            k,
            n_init: 5,
            max_iter: 100,
            seed: 7,
        }
    }

    #[test]
    fn separates_well_separated_blobs() {
        let rows = blobs();
        let fit = kmeans(&rows, &opts(3)).unwrap();
        for blob in 0..3 {
            let first = fit.labels[blob * 15];
            assert!(fit.labels[blob * 15..(blob + 1) * 15].iter().all(|&l| l == first));
        }
        let mut distinct = fit.labels.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
        assert_eq!(fit.sizes, vec![15, 15, 15]);
        assert!(silhouette(&rows, &fit.labels, 3) > 0.8);
    }

    #[test]
    fn deterministic_for_seed() {
        let rows = blobs();
        let a = kmeans(&rows, &opts(4)).unwrap();
        let b = kmeans(&rows, &opts(4)).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn elbow_inertia_decreases() {
        let rows = blobs();
        let elbow = scan_k(&rows, 2, 5, &opts(2)).unwrap();
        assert_eq!(elbow.len(), 4);
        assert!(elbow[1].inertia < elbow[0].inertia);
        let best = elbow.iter().max_by(|a, b| a.silhouette.total_cmp(&b.silhouette)).unwrap();
        assert_eq!(best.k, 3);
    }

    #[test]
    fn profiles_use_raw_units() {
        let columns = vec![vec![1.0, 1.2, 9.0, 9.2], vec![100.0, 100.0, 0.0, 0.0]];
        let result = cluster_columns(vec!["a".into(), "b".into()], &columns, true, &opts(2), 0).unwrap();
        let p = result.profiles.iter().find(|p| p.means[0] < 5.0).unwrap();
        assert_eq!(p.size, 2);
        assert!((p.means[0] - 1.1).abs() < 1e-12);
        assert!((p.means[1] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_rows_is_a_data_error() {
        let rows = vec![vec![0.0], vec![1.0]];
        assert_eq!(kmeans(&rows, &opts(3)).unwrap_err().exit_code(), crate::error::EXIT_DATA);
    }
}
