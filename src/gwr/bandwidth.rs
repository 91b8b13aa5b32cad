//! Bandwidth selection by golden-section or interval search.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::BandwidthCriterion;
use crate::error::AppError;
use crate::gwr::fit::GwrModel;
use crate::gwr::kernel::Bandwidth;

const GOLDEN_DELTA: f64 = 0.381_966_011_250_105;
const DEFAULT_MAX_ITER: usize = 200;
const DEFAULT_TOL: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Golden,
    Interval,
    Supplied,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    pub criterion: BandwidthCriterion,
    pub adaptive: bool,
    pub bw_min: Option<f64>,
    pub bw_max: Option<f64>,
    /// Step for an exhaustive interval search instead of golden section.
    pub interval: Option<f64>,
    pub max_iter: usize,
    pub tol: f64,
}

impl SearchOptions {
    pub fn new(criterion: BandwidthCriterion, adaptive: bool) -> Self {
        Self {
            criterion,
            adaptive,
            bw_min: None,
            bw_max: None,
            interval: None,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TracePoint {
    pub bandwidth: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthSearch {
    pub criterion: BandwidthCriterion,
    pub method: SearchMethod,
    pub lower: f64,
    pub upper: f64,
    pub best: Bandwidth,
    pub best_score: f64,
    /// Every evaluated candidate, in evaluation order.
    pub trace: Vec<TracePoint>,
}

/// Default search bounds.
///
/// Adaptive: from a small neighbor count up to `n`. Fixed: from half the
/// smallest to twice the largest inter-location distance.
pub fn default_bounds(model: &GwrModel<'_>, adaptive: bool) -> (f64, f64) {
    let n = model.n();
    let k = model.k();
    if adaptive {
        let preferred = 40 + 2 * k;
        let lo = if n > 2 * preferred {
            preferred
        } else {
            (2 * k + 2).max(n / 4)
        };
        (lo.min(n.saturating_sub(1)).max(1) as f64, n as f64)
    } else {
        let (min, max) = model.distance_range();
        (min / 2.0, max * 2.0)
    }
}

fn template(adaptive: bool) -> Bandwidth {
    if adaptive { Bandwidth::Adaptive(0) } else { Bandwidth::Fixed(0.0) }
}

/// Criterion value at one bandwidth; failed fits score `+∞`.
fn evaluate(model: &GwrModel<'_>, bw: Bandwidth, criterion: BandwidthCriterion) -> f64 {
    match model.score(bw) {
        Ok(scores) => {
            let v = scores.criterion(criterion);
            if v.is_finite() { v } else { f64::INFINITY }
        }
        Err(err) => {
            debug!(bandwidth = %bw, error = %err, "bandwidth candidate failed");
            f64::INFINITY
        }
    }
}

/// Search for the bandwidth minimizing the configured criterion.
pub fn select_bandwidth(model: &GwrModel<'_>, opts: &SearchOptions) -> Result<BandwidthSearch, AppError> {
    let (def_lo, def_hi) = default_bounds(model, opts.adaptive);
    let lower = opts.bw_min.unwrap_or(def_lo);
    let upper = opts.bw_max.unwrap_or(def_hi);
    if !(lower.is_finite() && upper.is_finite()) || lower <= 0.0 || upper <= lower {
        return Err(AppError::input(format!("Invalid bandwidth search range [{lower}, {upper}].")));
    }
    let tpl = template(opts.adaptive);

    let (method, trace) = match opts.interval {
        Some(step) => (SearchMethod::Interval, interval_search(model, tpl, lower, upper, step, opts.criterion)?),
        None => (SearchMethod::Golden, golden_search(model, tpl, lower, upper, opts)),
    };

    let best = trace
        .iter()
        .copied()
        .filter(|p| p.score.is_finite())
        .min_by(|a, b| a.score.total_cmp(&b.score).then(a.bandwidth.total_cmp(&b.bandwidth)))
        .ok_or_else(|| AppError::numeric("No bandwidth in the search range produced a valid GWR fit."))?;

    info!(
        criterion = opts.criterion.display_name(),
        bandwidth = best.bandwidth,
        score = best.score,
        evaluated = trace.len(),
        "bandwidth selected"
    );

    Ok(BandwidthSearch {
        criterion: opts.criterion,
        method,
        lower,
        upper,
        best: tpl.with_value(best.bandwidth),
        best_score: best.score,
        trace,
    })
}

/// Record a user-supplied bandwidth as a one-point search.
pub fn supplied_bandwidth(model: &GwrModel<'_>, value: f64, adaptive: bool, criterion: BandwidthCriterion) -> BandwidthSearch {
    let bw = template(adaptive).with_value(value);
    let score = evaluate(model, bw, criterion);
    BandwidthSearch {
        criterion,
        method: SearchMethod::Supplied,
        lower: bw.value(),
        upper: bw.value(),
        best: bw,
        best_score: score,
        trace: vec![TracePoint {
            bandwidth: bw.value(),
            score,
        }],
    }
}

fn golden_search(model: &GwrModel<'_>, tpl: Bandwidth, lower: f64, upper: f64, opts: &SearchOptions) -> Vec<TracePoint> {
    let round = |v: f64| if opts.adaptive { v.round() } else { v };
    let mut trace: Vec<TracePoint> = Vec::new();
    let score_at = |v: f64, trace: &mut Vec<TracePoint>| -> f64 {
        if let Some(p) = trace.iter().find(|p| p.bandwidth == v) {
            return p.score;
        }
        let score = evaluate(model, tpl.with_value(v), opts.criterion);
        trace.push(TracePoint { bandwidth: v, score });
        score
    };

    let mut a = lower;
    let mut c = upper;
    let mut b = round(a + GOLDEN_DELTA * (c - a));
    let mut d = round(c - GOLDEN_DELTA * (c - a));
    let mut diff = f64::INFINITY;
    let mut iters = 0;

    while diff.abs() > opts.tol && iters < opts.max_iter {
        iters += 1;
        let sb = score_at(b, &mut trace);
        let sd = score_at(d, &mut trace);
        if sb <= sd {
            c = d;
            d = b;
            b = round(a + GOLDEN_DELTA * (c - a));
        } else {
            a = b;
            b = d;
            d = round(c - GOLDEN_DELTA * (c - a));
        }
        diff = if sb.is_finite() && sd.is_finite() {
            sb - sd
        } else {
            f64::INFINITY
        };
    }
    trace
}

fn interval_search(
    model: &GwrModel<'_>,
    tpl: Bandwidth,
    lower: f64,
    upper: f64,
    step: f64,
    criterion: BandwidthCriterion,
) -> Result<Vec<TracePoint>, AppError> {
    if step.is_nan() || step <= 0.0 {
        return Err(AppError::input("Bandwidth interval step must be positive."));
    }
    let mut candidates = Vec::new();
    let mut v = lower;
    while v <= upper + 1e-9 {
        candidates.push(tpl.with_value(v).value());
        v += step;
    }
    candidates.dedup();
    Ok(candidates
        .par_iter()
        .map(|&bw| TracePoint {
            bandwidth: bw,
            score: evaluate(model, tpl.with_value(bw), criterion),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KernelKind;
    use crate::gwr::fit::tests::drifting_slope;

    #[test]
    fn adaptive_golden_returns_integer_within_bounds() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Bisquare).unwrap();
        let opts = SearchOptions::new(BandwidthCriterion::Aicc, true);
        let search = select_bandwidth(&model, &opts).unwrap();
        let Bandwidth::Adaptive(k) = search.best else {
            panic!("expected adaptive bandwidth");
        };
        assert!(k as f64 >= search.lower && k as f64 <= search.upper);
        assert!(search.trace.len() >= 2);
        assert!(search.trace.iter().all(|p| p.bandwidth.fract() == 0.0));
        let min = search.trace.iter().map(|p| p.score).fold(f64::INFINITY, f64::min);
        assert_eq!(search.best_score, min);
        // Slopes drift, so the chosen neighborhood should not be global.
        assert!(k < data.n());
    }

    #[test]
    fn interval_search_scans_every_step() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Gaussian).unwrap();
        let mut opts = SearchOptions::new(BandwidthCriterion::Cv, true);
        opts.bw_min = Some(20.0);
        opts.bw_max = Some(60.0);
        opts.interval = Some(10.0);
        let search = select_bandwidth(&model, &opts).unwrap();
        assert_eq!(search.method, SearchMethod::Interval);
        let bws: Vec<f64> = search.trace.iter().map(|p| p.bandwidth).collect();
        assert_eq!(bws, vec![20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn fixed_bounds_follow_distances() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Gaussian).unwrap();
        let (lo, hi) = default_bounds(&model, false);
        assert!((lo - 50.0).abs() < 1e-9);
        assert!(hi > 3000.0);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Gaussian).unwrap();
        let mut opts = SearchOptions::new(BandwidthCriterion::Aicc, false);
        opts.bw_min = Some(500.0);
        opts.bw_max = Some(100.0);
        assert_eq!(select_bandwidth(&model, &opts).unwrap_err().exit_code(), crate::error::EXIT_INPUT);
    }
}
