//! Global and local Moran's I.
//!
//! Global:
//!
//! ```text
//! I = (n / S0) · Σ_i z_i (Wz)_i / Σ_i z_i²
//! ```
//!
//! with `z = x - x̄`. Inference is reported three ways: analytic moments
//! under normality, analytic moments under randomization, and a permutation
//! pseudo p-value. Local (LISA) statistics use conditional permutation: the
//! value at `i` is held fixed while its neighbors are redrawn from the rest.
//!
//! Every permutation draws from its own `StdRng` seeded from the run seed plus
//! the permutation (or unit) index, so results don't depend on how rayon
//! schedules work.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::seq::index::sample;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::AppError;
use crate::math::{mean, normal_two_sided_p, std_dev};
use crate::spatial::SpatialWeights;

/// Global Moran's I with analytic and permutation inference.
#[derive(Debug, Clone, Serialize)]
pub struct MoranGlobal {
    pub n: usize,
    pub i: f64,
    pub expected: f64,
    pub var_norm: f64,
    pub z_norm: f64,
    pub p_norm: f64,
    pub var_rand: f64,
    pub z_rand: f64,
    pub p_rand: f64,
    pub permutation: Option<PermutationTest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermutationTest {
    pub permutations: usize,
    pub p_sim: f64,
    pub mean_sim: f64,
    pub sd_sim: f64,
    pub z_sim: f64,
}

/// Moran scatterplot quadrant of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LisaQuadrant {
    HighHigh,
    LowHigh,
    LowLow,
    HighLow,
}

impl LisaQuadrant {
    pub fn code(self) -> &'static str {
        match self {
            LisaQuadrant::HighHigh => "HH",
            LisaQuadrant::LowHigh => "LH",
            LisaQuadrant::LowLow => "LL",
            LisaQuadrant::HighLow => "HL",
        }
    }
}

/// Local Moran's I for every unit.
#[derive(Debug, Clone, Serialize)]
pub struct LisaResult {
    pub local_i: Vec<f64>,
    pub quadrant: Vec<LisaQuadrant>,
    pub p_sim: Vec<f64>,
    pub significant: Vec<bool>,
    pub alpha: f64,
}

impl LisaResult {
    /// Cluster label: the quadrant code when significant, `ns` otherwise.
    pub fn label(&self, i: usize) -> &'static str {
        if self.significant[i] { self.quadrant[i].code() } else { "ns" }
    }

    /// Significant units per quadrant, in `HH, LH, LL, HL` order.
    pub fn counts(&self) -> [(LisaQuadrant, usize); 4] {
        let mut out = [
            (LisaQuadrant::HighHigh, 0),
            (LisaQuadrant::LowHigh, 0),
            (LisaQuadrant::LowLow, 0),
            (LisaQuadrant::HighLow, 0),
        ];
        for (q, &sig) in self.quadrant.iter().zip(self.significant.iter()) {
            if !sig {
                continue;
            }
            if let Some(slot) = out.iter_mut().find(|(k, _)| k == q) {
                slot.1 += 1;
            }
        }
        out
    }
}

/// Global Moran's I of `x` under weights `w`.
pub fn moran_global(
    x: &[f64],
    w: &SpatialWeights,
    permutations: usize,
    seed: u64,
) -> Result<MoranGlobal, AppError> {
    let z = centered(x, w)?;
    let n = z.len();
    let nf = n as f64;

    let s0 = w.s0();
    let s1 = w.s1();
    let s2 = w.s2();
    let i = moran_i(&z, w, s0);

    let expected = -1.0 / (nf - 1.0);

    let var_norm = (nf * nf * s1 - nf * s2 + 3.0 * s0 * s0) / (s0 * s0 * (nf * nf - 1.0)) - expected * expected;

    let m2 = z.iter().map(|v| v * v).sum::<f64>() / nf;
    let m4 = z.iter().map(|v| v.powi(4)).sum::<f64>() / nf;
    let kurt = m4 / (m2 * m2);
    let var_rand = if n > 3 {
        let a = nf * ((nf * nf - 3.0 * nf + 3.0) * s1 - nf * s2 + 3.0 * s0 * s0);
        let b = kurt * ((nf * nf - nf) * s1 - 2.0 * nf * s2 + 6.0 * s0 * s0);
        (a - b) / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0) * s0 * s0) - expected * expected
    } else {
        f64::NAN
    };

    let z_norm = (i - expected) / var_norm.sqrt();
    let z_rand = (i - expected) / var_rand.sqrt();

    let permutation = (permutations > 0).then(|| {
        let sims: Vec<f64> = (0..permutations)
            .into_par_iter()
            .map(|p| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(p as u64));
                let mut zp = z.clone();
                zp.shuffle(&mut rng);
                moran_i(&zp, w, s0)
            })
            .collect();
        let mean_sim = mean(&sims).unwrap_or(f64::NAN);
        let sd_sim = std_dev(&sims, 1).unwrap_or(f64::NAN);
        PermutationTest {
            permutations,
            p_sim: pseudo_p(i, &sims),
            mean_sim,
            sd_sim,
            z_sim: (i - mean_sim) / sd_sim,
        }
    });

    Ok(MoranGlobal {
        n,
        i,
        expected,
        var_norm,
        z_norm,
        p_norm: normal_two_sided_p(z_norm),
        var_rand,
        z_rand,
        p_rand: normal_two_sided_p(z_rand),
        permutation,
    })
}

/// Local Moran's I with conditional permutation inference.
pub fn moran_local(
    x: &[f64],
    w: &SpatialWeights,
    permutations: usize,
    seed: u64,
    alpha: f64,
) -> Result<LisaResult, AppError> {
    let z = centered(x, w)?;
    let n = z.len();
    let m2 = z.iter().map(|v| v * v).sum::<f64>() / n as f64;
    let lag = w.lag(&z);

    let local_i: Vec<f64> = z.iter().zip(lag.iter()).map(|(zi, li)| zi * li / m2).collect();
    let quadrant: Vec<LisaQuadrant> = z.iter().zip(lag.iter()).map(|(&zi, &li)| quadrant_of(zi, li)).collect();

    let p_sim: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let k = w.cardinality(i);
            if permutations == 0 || k == 0 || k > n - 1 {
                return f64::NAN;
            }
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add((i as u64).wrapping_mul(0x9E37_79B9)));
            let sims: Vec<f64> = (0..permutations)
                .map(|_| {
                    let picked = sample(&mut rng, n - 1, k);
                    let sum: f64 = picked
                        .iter()
                        .map(|j| if j >= i { z[j + 1] } else { z[j] })
                        .sum();
                    z[i] * (sum / k as f64) / m2
                })
                .collect();
            pseudo_p(local_i[i], &sims)
        })
        .collect();

    let significant = p_sim.iter().map(|&p| p.is_finite() && p <= alpha).collect();

    Ok(LisaResult {
        local_i,
        quadrant,
        p_sim,
        significant,
        alpha,
    })
}

/// `(z_i, (Wz)_i)` pairs for a Moran scatterplot, with `z` standardized.
pub fn moran_scatter(x: &[f64], w: &SpatialWeights) -> Vec<(f64, f64)> {
    let sd = std_dev(x, 0).unwrap_or(1.0);
    let m = mean(x).unwrap_or(0.0);
    let z: Vec<f64> = x.iter().map(|v| if sd > 0.0 { (v - m) / sd } else { 0.0 }).collect();
    let lag = w.lag(&z);
    z.into_iter().zip(lag).collect()
}

fn centered(x: &[f64], w: &SpatialWeights) -> Result<Vec<f64>, AppError> {
    let n = x.len();
    if n != w.n() {
        return Err(AppError::numeric(format!(
            "Moran's I: {} values but weights cover {} units.",
            n,
            w.n()
        )));
    }
    if n < 3 {
        return Err(AppError::data("Moran's I needs at least 3 units."));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(AppError::numeric("Moran's I: non-finite input value."));
    }
    let m = mean(x).unwrap_or(0.0);
    let z: Vec<f64> = x.iter().map(|v| v - m).collect();
    if z.iter().all(|v| v.abs() < 1e-15) {
        return Err(AppError::data("Moran's I is undefined for a constant variable."));
    }
    Ok(z)
}

fn moran_i(z: &[f64], w: &SpatialWeights, s0: f64) -> f64 {
    let lag = w.lag(z);
    let num: f64 = z.iter().zip(lag.iter()).map(|(a, b)| a * b).sum();
    let den: f64 = z.iter().map(|v| v * v).sum();
    (z.len() as f64 / s0) * num / den
}

/// Folded pseudo p-value, `(1 + #extreme) / (1 + P)`, on the observed side.
fn pseudo_p(observed: f64, sims: &[f64]) -> f64 {
    let p = sims.len();
    let mut larger = sims.iter().filter(|&&s| s >= observed).count();
    if p - larger < larger {
        larger = p - larger;
    }
    (larger as f64 + 1.0) / (p as f64 + 1.0)
}

fn quadrant_of(z: f64, lag: f64) -> LisaQuadrant {
    match (z >= 0.0, lag >= 0.0) {
        (true, true) => LisaQuadrant::HighHigh,
        (false, true) => LisaQuadrant::LowHigh,
        (false, false) => LisaQuadrant::LowLow,
        (true, false) => LisaQuadrant::HighLow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WeightsKind;
    use crate::spatial::weights::tests::grid_weights;

    #[test]
    fn checkerboard_is_perfectly_negative_under_rook() {
        let w = grid_weights(4, WeightsKind::Rook);
        let x: Vec<f64> = (0..16).map(|i| if (i / 4 + i % 4) % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let m = moran_global(&x, &w, 0, 1).unwrap();
        assert!((m.i + 1.0).abs() < 1e-12, "got {}", m.i);
        assert!(m.z_norm < 0.0);
        assert!(m.permutation.is_none());
    }

    #[test]
    fn gradient_is_positive_and_significant() {
        let w = grid_weights(6, WeightsKind::Queen);
        let x: Vec<f64> = (0..36).map(|i| (i / 6) as f64 + (i % 6) as f64).collect();
        let m = moran_global(&x, &w, 199, 7).unwrap();
        assert!(m.i > 0.5, "got {}", m.i);
        assert!((m.expected + 1.0 / 35.0).abs() < 1e-12);
        let perm = m.permutation.unwrap();
        assert!(perm.p_sim <= 0.01, "p_sim {}", perm.p_sim);
        assert!(m.p_norm < 0.01);
    }

    #[test]
    fn permutation_test_is_deterministic_for_a_seed() {
        let w = grid_weights(5, WeightsKind::Queen);
        let x: Vec<f64> = (0..25).map(|i| ((i * 7) % 11) as f64).collect();
        let a = moran_global(&x, &w, 99, 3).unwrap().permutation.unwrap();
        let b = moran_global(&x, &w, 99, 3).unwrap().permutation.unwrap();
        assert_eq!(a.p_sim, b.p_sim);
        assert_eq!(a.mean_sim, b.mean_sim);
    }

    #[test]
    fn local_moran_flags_hot_corner() {
        let w = grid_weights(6, WeightsKind::Queen);
        // High values in the top-right 3x3 block, low elsewhere.
        let x: Vec<f64> = (0..36)
            .map(|i| if i / 6 >= 3 && i % 6 >= 3 { 10.0 } else { 0.0 })
            .collect();
        let lisa = moran_local(&x, &w, 499, 11, 0.05).unwrap();
        // Unit 35 is the far top-right corner: high surrounded by high.
        assert_eq!(lisa.quadrant[35], LisaQuadrant::HighHigh);
        assert!(lisa.local_i[35] > 0.0);
        // With row-standardized weights the local statistics average to the global I.
        let global = moran_global(&x, &w, 0, 0).unwrap();
        let sum: f64 = lisa.local_i.iter().sum();
        assert!((sum / 36.0 - global.i).abs() < 1e-9);
    }

    #[test]
    fn constant_variable_is_rejected() {
        let w = grid_weights(3, WeightsKind::Rook);
        assert!(moran_global(&[1.0; 9], &w, 0, 0).is_err());
    }
}
