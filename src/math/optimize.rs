//! Bounded one-dimensional maximization.
//!
//! The spatial lag/error likelihoods are concentrated down to a single
//! autoregressive parameter on a known interval. We search that interval with
//! a deterministic coarse grid first (so a flat or bimodal likelihood can't
//! trap the refinement), then refine with golden-section search around the
//! best grid cell.

use rayon::prelude::*;

const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Result of a 1-D search.
#[derive(Debug, Clone, Copy)]
pub struct ScalarOptimum {
    pub x: f64,
    pub value: f64,
    pub evaluations: usize,
}

/// Golden-section maximization of `f` on `[lo, hi]`.
pub fn golden_section_max<F>(f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> ScalarOptimum
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = score(&f, c);
    let mut fd = score(&f, d);
    let mut evaluations = 2;

    for _ in 0..max_iter {
        if (b - a).abs() <= tol {
            break;
        }
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = score(&f, c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = score(&f, d);
        }
        evaluations += 1;
    }

    if fc > fd {
        ScalarOptimum { x: c, value: fc, evaluations }
    } else {
        ScalarOptimum { x: d, value: fd, evaluations }
    }
}

/// Coarse grid (evaluated in parallel) followed by golden-section refinement.
pub fn grid_then_golden_max<F>(f: F, lo: f64, hi: f64, steps: usize, tol: f64) -> Option<ScalarOptimum>
where
    F: Fn(f64) -> f64 + Sync,
{
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return None;
    }
    let steps = steps.max(3);
    let grid: Vec<f64> = (0..steps)
        .map(|i| lo + (hi - lo) * i as f64 / (steps as f64 - 1.0))
        .collect();

    let values: Vec<f64> = grid.par_iter().map(|&x| score(&f, x)).collect();

    // Deterministic: highest value, ties broken by lowest grid index.
    let mut best = 0usize;
    for i in 1..values.len() {
        if values[i] > values[best] {
            best = i;
        }
    }
    if values[best] == f64::NEG_INFINITY {
        return None;
    }

    let a = grid[best.saturating_sub(1)];
    let b = grid[(best + 1).min(grid.len() - 1)];
    let refined = golden_section_max(&f, a, b, tol, 200);
    let total = refined.evaluations + steps;

    if refined.value >= values[best] {
        Some(ScalarOptimum { evaluations: total, ..refined })
    } else {
        Some(ScalarOptimum {
            x: grid[best],
            value: values[best],
            evaluations: total,
        })
    }
}

fn score<F: Fn(f64) -> f64>(f: &F, x: f64) -> f64 {
    let v = f(x);
    if v.is_finite() { v } else { f64::NEG_INFINITY }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_section_finds_parabola_peak() {
        let opt = golden_section_max(|x| -(x - 0.3) * (x - 0.3), -1.0, 1.0, 1e-8, 200);
        assert!((opt.x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn grid_escapes_local_maximum() {
        // Two bumps; the taller one is near 0.8.
        let f = |x: f64| (-(x + 0.6).powi(2) * 50.0).exp() + 2.0 * (-(x - 0.8).powi(2) * 50.0).exp();
        let opt = grid_then_golden_max(f, -1.0, 1.0, 41, 1e-8).unwrap();
        assert!((opt.x - 0.8).abs() < 1e-4, "got {}", opt.x);
    }

    #[test]
    fn non_finite_objective_is_rejected() {
        assert!(grid_then_golden_max(|_| f64::NAN, 0.0, 1.0, 10, 1e-6).is_none());
    }
}
