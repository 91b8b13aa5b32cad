//! Formatted terminal output.
//!
//! Formatting lives here so the statistics code stays free of presentation
//! and output changes are localized.

use crate::app::pipeline::{GlobalModels, LocalModel, Prepared, RunOutput, SpatialStats};
use crate::cluster::ClusterResult;
use crate::gwr::{BandwidthSearch, GwrFit, SearchMethod};
use crate::models::{Coefficient, LmDiagnostics, LmTest};
use crate::spatial::SpatialWeights;
use crate::stats::{LisaResult, MoranGlobal};

/// Full `analyze` report.
pub fn format_run_report(out: &RunOutput) -> String {
    let mut s = String::new();
    s.push_str(&format_dataset(&out.prepared));
    s.push_str(&format_weights(&out.prepared.weights));
    s.push_str(&format_spatial(&out.spatial, &out.prepared));
    s.push_str(&format_global_models(&out.global));
    s.push_str(&format_lm(&out.global.lm, out.prepared.config.alpha));
    s.push_str(&format_local(&out.local, &out.prepared));
    s
}

pub fn format_dataset(p: &Prepared) -> String {
    let mut out = String::new();
    out.push_str("=== lspat - spatial analysis of listing prices ===\n");
    out.push_str(&format!("Source: {}\n", p.source.description));
    out.push_str(&format!("CRS: {} ({})\n", p.source.crs.display_name(), p.source.crs_source));
    if let Some(field) = &p.source.id_field {
        out.push_str(&format!("Area id field: {field}\n"));
    }
    out.push_str(&format!(
        "Listings: read={} used={} filtered={} invalid={} outside areas={}\n",
        p.ingest.rows_read,
        p.ingest.listings_used,
        p.ingest.rows_filtered,
        p.ingest.row_errors.len(),
        p.ingest.unmatched
    ));
    if let Some(stats) = &p.ingest.stats {
        out.push_str(&format!(
            "Price: min={:.2} median={:.2} max={:.2} | entire homes={:.1}%\n",
            stats.price_min,
            stats.price_median,
            stats.price_max,
            100.0 * stats.entire_home_share
        ));
    }
    out.push_str(&format!(
        "Areas: loaded={} analysed={} dropped={}\n",
        p.areas.len(),
        p.records.len(),
        p.dropped.len()
    ));
    for d in p.dropped.iter().take(8) {
        out.push_str(&format!("  - {} ({})\n", d.id, d.reason));
    }
    if p.dropped.len() > 8 {
        out.push_str(&format!("  ... {} more\n", p.dropped.len() - 8));
    }
    out.push_str(&format!(
        "Response: {} | explanatory: {}\n\n",
        p.config.response_label(),
        p.config
            .explanatory
            .iter()
            .map(|v| v.label())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    out
}

pub fn format_weights(w: &SpatialWeights) -> String {
    let s = w.summary();
    let mut out = String::new();
    out.push_str(&format!("Spatial weights ({:?}, row-standardized):\n", w.kind));
    out.push_str(&format!(
        "  n={} neighbors min/mean/max={}/{:.2}/{} nonzero={:.2}%\n",
        s.n, s.min_neighbors, s.mean_neighbors, s.max_neighbors, s.pct_nonzero
    ));
    if s.linked_islands > 0 {
        out.push_str(&format!("  islands linked to nearest neighbor: {}\n", s.linked_islands));
    }
    out.push('\n');
    out
}

pub fn format_moran(m: &MoranGlobal, response: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("Global Moran's I ({response}):\n"));
    out.push_str(&format!("  I={:.4}  E[I]={:.4}\n", m.i, m.expected));
    out.push_str(&format!(
        "  normality:     z={:>8.3}  p={}\n",
        m.z_norm,
        fmt_p(m.p_norm)
    ));
    out.push_str(&format!(
        "  randomization: z={:>8.3}  p={}\n",
        m.z_rand,
        fmt_p(m.p_rand)
    ));
    if let Some(perm) = &m.permutation {
        out.push_str(&format!(
            "  permutation ({}): z={:>8.3}  pseudo-p={:.4}\n",
            perm.permutations, perm.z_sim, perm.p_sim
        ));
    }
    out
}

pub fn format_lisa(lisa: &LisaResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("LISA clusters (alpha={}):", lisa.alpha));
    let mut sig = 0;
    for (q, c) in lisa.counts() {
        out.push_str(&format!(" {}={c}", q.code()));
        sig += c;
    }
    out.push_str(&format!(" ns={}\n\n", lisa.local_i.len() - sig));
    out
}

pub fn format_spatial(s: &SpatialStats, p: &Prepared) -> String {
    let mut out = format_moran(&s.moran, p.config.response_label());
    out.push_str(&format_lisa(&s.lisa));
    out
}

/// OLS, spatial lag and spatial error side by side.
pub fn format_global_models(g: &GlobalModels) -> String {
    let mut out = String::new();
    out.push_str(&format!("Global models (dependent: {}, n={}):\n", g.data.y_name, g.data.n()));
    out.push_str(
        format!(
            "{:<14} {:>22} {:>22} {:>22}\n",
            "variable", "OLS", "spatial lag", "spatial error"
        )
        .as_str(),
    );
    out.push_str(&format!("{:-<14} {:-<22} {:-<22} {:-<22}\n", "", "", "", ""));

    for j in 0..g.data.k() {
        out.push_str(&format!(
            "{:<14} {:>22} {:>22} {:>22}\n",
            truncate(&g.data.names[j], 14),
            fmt_coef(&g.ols.coefficients[j]),
            fmt_coef(&g.lag.coefficients[j]),
            fmt_coef(&g.error.coefficients[j]),
        ));
    }
    out.push_str(&format!(
        "{:<14} {:>22} {:>22} {:>22}\n",
        "rho (Wy)",
        "",
        fmt_coef(&g.lag.rho),
        ""
    ));
    out.push_str(&format!(
        "{:<14} {:>22} {:>22} {:>22}\n",
        "lambda",
        "",
        "",
        fmt_coef(&g.error.lambda)
    ));
    out.push_str(&format!("{:-<14} {:-<22} {:-<22} {:-<22}\n", "", "", "", ""));
    out.push_str(&format!(
        "{:<14} {:>22.4} {:>22.4} {:>22.4}\n",
        "R2 / pseudo", g.ols.r2, g.lag.pseudo_r2, g.error.pseudo_r2
    ));
    out.push_str(&format!(
        "{:<14} {:>22.3} {:>22.3} {:>22.3}\n",
        "log-lik", g.ols.log_likelihood, g.lag.log_likelihood, g.error.log_likelihood
    ));
    out.push_str(&format!(
        "{:<14} {:>22.3} {:>22.3} {:>22.3}\n",
        "AIC", g.ols.aic, g.lag.aic, g.error.aic
    ));
    out.push_str(&format!(
        "{:<14} {:>22.3} {:>22.3} {:>22.3}\n",
        "Schwarz", g.ols.schwarz, g.lag.schwarz, g.error.schwarz
    ));
    out.push_str(&format!(
        "{:<14} {:>22} {:>22} {:>22}\n",
        "LR vs OLS",
        "",
        format!("{:.3} (p={})", g.lag.lr_vs_ols.statistic, fmt_p(g.lag.lr_vs_ols.p_value)),
        format!("{:.3} (p={})", g.error.lr_vs_ols.statistic, fmt_p(g.error.lr_vs_ols.p_value)),
    ));
    out.push_str(&format!(
        "OLS: adj R2={:.4} F={:.3} (p={}) cond.no={:.1} Jarque-Bera={:.3} (p={})\n\n",
        g.ols.adj_r2,
        g.ols.f_stat,
        fmt_p(g.ols.f_p_value),
        g.ols.condition_number,
        g.ols.jarque_bera,
        fmt_p(g.ols.jarque_bera_p)
    ));
    out
}

pub fn format_lm(lm: &LmDiagnostics, alpha: f64) -> String {
    let mut out = String::new();
    out.push_str("Diagnostics for spatial dependence (OLS residuals):\n");
    out.push_str(&format!("  Moran's I (residuals) {:>10.4}\n", lm.residual_moran));
    let rows: [(&str, &LmTest); 5] = [
        ("LM-lag", &lm.lm_lag),
        ("robust LM-lag", &lm.robust_lm_lag),
        ("LM-error", &lm.lm_error),
        ("robust LM-error", &lm.robust_lm_error),
        ("SARMA", &lm.sarma),
    ];
    for (name, t) in rows {
        out.push_str(&format!(
            "  {:<20} df={} {:>10.4}  p={}\n",
            name,
            t.df,
            t.statistic,
            fmt_p(t.p_value)
        ));
    }
    out.push_str(&format!("  suggested model: {}\n\n", lm.suggestion(alpha)));
    out
}

pub fn format_bandwidth(b: &BandwidthSearch) -> String {
    let mut out = String::new();
    let method = match b.method {
        SearchMethod::Golden => "golden section",
        SearchMethod::Interval => "interval",
        SearchMethod::Supplied => "supplied",
    };
    out.push_str(&format!(
        "Bandwidth selection ({method}, {}): range=[{:.1}, {:.1}] best={} score={:.4}\n",
        b.criterion.display_name(),
        b.lower,
        b.upper,
        b.best,
        b.best_score
    ));
    out.push_str(&format!("  {:>12} {:>14}\n", "bandwidth", "score"));
    let mut sorted = b.trace.clone();
    sorted.sort_by(|a, c| a.bandwidth.total_cmp(&c.bandwidth));
    for p in &sorted {
        let mark = if p.bandwidth == b.best.value() { "*" } else { " " };
        out.push_str(&format!("{mark} {:>12.2} {:>14.4}\n", p.bandwidth, p.score));
    }
    out.push('\n');
    out
}

pub fn format_gwr(g: &GwrFit, standardized: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "GWR ({:?} kernel, bandwidth {}, {}):\n",
        g.kernel,
        g.bandwidth,
        if standardized { "standardized variables" } else { "raw variables" }
    ));
    out.push_str(&format!(
        "  R2={:.4} adj R2={:.4} ENP={:.2} sigma2={:.5}\n",
        g.r2, g.adj_r2, g.enp, g.sigma2
    ));
    out.push_str(&format!(
        "  AICc={:.3} AIC={:.3} BIC={:.3} CV={:.5}\n",
        g.scores.aicc, g.scores.aic, g.scores.bic, g.scores.cv
    ));
    out.push_str(&format!(
        "  adjusted alpha={:.5} critical |t|={:.3}\n",
        g.adj_alpha, g.critical_t
    ));
    out.push_str(&format!(
        "  {:<14} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>7}\n",
        "coefficient", "mean", "min", "Q1", "median", "Q3", "max", "%sig"
    ));
    for c in g.coefficient_summaries() {
        let Some(f) = c.five else { continue };
        out.push_str(&format!(
            "  {:<14} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>6.1}%\n",
            truncate(&c.name, 14),
            c.mean,
            f.min,
            f.q1,
            f.median,
            f.q3,
            f.max,
            c.pct_significant
        ));
    }
    out.push('\n');
    out
}

pub fn format_clusters(c: &ClusterResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "k-means on local coefficients (k={}, inertia={:.3}, silhouette={:.3}{}):\n",
        c.kmeans.k,
        c.kmeans.inertia,
        c.silhouette,
        if c.standardized { ", standardized" } else { "" }
    ));
    out.push_str(&format!("  {:<8} {:>5}", "cluster", "n"));
    for name in &c.names {
        out.push_str(&format!(" {:>12}", truncate(name, 12)));
    }
    out.push('\n');
    for p in &c.profiles {
        out.push_str(&format!("  {:<8} {:>5}", p.cluster, p.size));
        for m in &p.means {
            out.push_str(&format!(" {m:>12.4}"));
        }
        out.push('\n');
    }
    if !c.elbow.is_empty() {
        out.push_str(&format!("  {:>4} {:>12} {:>11}\n", "k", "inertia", "silhouette"));
        for e in &c.elbow {
            out.push_str(&format!("  {:>4} {:>12.3} {:>11.3}\n", e.k, e.inertia, e.silhouette));
        }
    }
    out.push('\n');
    out
}

pub fn format_local(l: &LocalModel, p: &Prepared) -> String {
    let mut out = format_bandwidth(&l.bandwidth);
    out.push_str(&format_gwr(&l.gwr, p.config.standardize));
    out.push_str(&format_clusters(&l.clusters));
    out
}

/// `estimate (stat)` with significance stars.
fn fmt_coef(c: &Coefficient) -> String {
    format!("{:.4} ({:.2}){}", c.estimate, c.statistic, stars(c.p_value))
}

fn stars(p: f64) -> &'static str {
    if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "** "
    } else if p < 0.05 {
        "*  "
    } else {
        "   "
    }
}

fn fmt_p(p: f64) -> String {
    if !p.is_finite() {
        "n/a".to_string()
    } else if p < 1e-4 {
        "<0.0001".to_string()
    } else {
        format!("{p:.4}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_values_and_stars() {
        assert_eq!(fmt_p(0.00001), "<0.0001");
        assert_eq!(fmt_p(0.0421), "0.0421");
        assert_eq!(fmt_p(f64::NAN), "n/a");
        assert_eq!(stars(0.0005), "***");
        assert_eq!(stars(0.2), "   ");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("entire_home", 6), "entir.");
        assert_eq!(truncate("beds", 6), "beds");
    }

    #[test]
    fn coefficient_cell_has_stars() {
        let c = Coefficient {
            name: "x".into(),
            estimate: 1.23456,
            std_error: 0.1,
            statistic: 12.3,
            p_value: 1e-6,
        };
        assert_eq!(fmt_coef(&c), "1.2346 (12.30)***");
    }

    #[test]
    fn run_report_has_every_section() {
        let config = crate::domain::AnalysisConfig {
            demo_grid: 5,
            demo_listings_per_area: 10,
            permutations: 19,
            clusters: 2,
            cluster_k_max: 3,
            kmeans_restarts: 2,
            ..crate::domain::AnalysisConfig::default()
        };
        let run = crate::app::pipeline::run_analysis(&config).unwrap();
        let report = format_run_report(&run);
        for heading in [
            "Spatial weights",
            "Global Moran's I",
            "LISA clusters",
            "Global models",
            "Diagnostics for spatial dependence",
            "Bandwidth selection",
            "GWR (",
            "k-means on local coefficients",
        ] {
            assert!(report.contains(heading), "missing {heading}");
        }
        for name in &run.local.gwr.names {
            assert!(report.contains(truncate(name, 14).as_str()));
        }
    }
}
