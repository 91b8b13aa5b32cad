//! Export per-area results to CSV and a run summary to JSON.
//!
//! The CSV is meant to be joined back onto the boundary layer in a GIS; the
//! JSON captures configuration and every model fit for later comparison.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::app::pipeline::RunOutput;
use crate::cluster::ClusterResult;
use crate::domain::AnalysisConfig;
use crate::error::AppError;
use crate::gwr::{BandwidthSearch, CoefficientSummary, GwrFit};
use crate::models::{LmDiagnostics, OlsFit, SpatialErrorFit, SpatialLagFit};
use crate::spatial::WeightsSummary;
use crate::stats::MoranGlobal;

/// Write one row per analysed area.
pub fn write_areas_csv(path: &Path, out: &RunOutput) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::input(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let write_err = |e: csv::Error| AppError::input(format!("Failed to write export CSV row: {e}"));

    let prepared = &out.prepared;
    let config = &prepared.config;
    let gwr = &out.local.gwr;
    let lag = prepared.weights.lag(&prepared.response);
    let filtered_t = gwr.filtered_t_values();

    let mut header: Vec<String> = ["id", "name", "x", "y", "n_listings", "mean_price"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(config.explanatory.iter().map(|v| format!("mean_{}", v.label())));
    header.extend(
        ["response", "response_lag", "local_i", "lisa_p", "lisa"]
            .iter()
            .map(|s| s.to_string()),
    );
    for name in &gwr.names {
        header.push(format!("gwr_{name}"));
        header.push(format!("gwr_se_{name}"));
        header.push(format!("gwr_t_{name}"));
        header.push(format!("gwr_tf_{name}"));
    }
    header.extend(["gwr_local_r2", "gwr_residual", "gwr_influence", "cluster"].iter().map(|s| s.to_string()));
    writer.write_record(&header).map_err(write_err)?;

    for (i, r) in prepared.records.iter().enumerate() {
        let mut row = vec![
            r.id.clone(),
            r.name.clone().unwrap_or_default(),
            format!("{:.3}", r.centroid.0),
            format!("{:.3}", r.centroid.1),
            r.n_listings.to_string(),
            format!("{:.4}", r.mean_price),
        ];
        row.extend(r.means.iter().map(|m| format!("{m:.6}")));
        row.push(format!("{:.6}", prepared.response[i]));
        row.push(format!("{:.6}", lag[i]));
        row.push(format!("{:.6}", out.spatial.lisa.local_i[i]));
        row.push(format!("{:.4}", out.spatial.lisa.p_sim[i]));
        row.push(out.spatial.lisa.label(i).to_string());
        for j in 0..gwr.k {
            row.push(format!("{:.6}", gwr.params[(i, j)]));
            row.push(format!("{:.6}", gwr.std_errors[(i, j)]));
            row.push(format!("{:.4}", gwr.t_values[(i, j)]));
            row.push(format!("{:.4}", filtered_t[(i, j)]));
        }
        row.push(format!("{:.4}", gwr.local_r2[i]));
        row.push(format!("{:.6}", gwr.residuals[i]));
        row.push(format!("{:.6}", gwr.influence[i]));
        row.push(out.local.clusters.kmeans.labels[i].to_string());
        writer.write_record(&row).map_err(write_err)?;
    }

    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct DatasetSummary {
    pub source: String,
    pub crs: String,
    pub listings_read: usize,
    pub listings_used: usize,
    pub listings_unmatched: usize,
    pub row_errors: usize,
    pub areas_loaded: usize,
    pub areas_analysed: usize,
    pub areas_dropped: usize,
}

#[derive(Debug, Serialize)]
pub struct LisaCounts {
    pub hh: usize,
    pub lh: usize,
    pub ll: usize,
    pub hl: usize,
    pub not_significant: usize,
}

/// JSON run summary.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub tool: &'static str,
    pub version: &'static str,
    pub generated_at: DateTime<Local>,
    pub config: &'a AnalysisConfig,
    pub dataset: DatasetSummary,
    pub weights: WeightsSummary,
    pub moran: &'a MoranGlobal,
    pub lisa: LisaCounts,
    pub ols: &'a OlsFit,
    pub lm: &'a LmDiagnostics,
    pub spatial_lag: &'a SpatialLagFit,
    pub spatial_error: &'a SpatialErrorFit,
    pub bandwidth: &'a BandwidthSearch,
    pub gwr: &'a GwrFit,
    pub gwr_coefficients: Vec<CoefficientSummary>,
    pub clusters: &'a ClusterResult,
}

pub fn build_summary(out: &RunOutput) -> RunSummary<'_> {
    let p = &out.prepared;
    let counts = out.spatial.lisa.counts();
    let significant: usize = counts.iter().map(|(_, c)| c).sum();
    RunSummary {
        tool: "lspat",
        version: env!("CARGO_PKG_VERSION"),
        generated_at: Local::now(),
        config: &p.config,
        dataset: DatasetSummary {
            source: p.source.description.clone(),
            crs: p.source.crs.display_name().to_string(),
            listings_read: p.ingest.rows_read,
            listings_used: p.ingest.listings_used,
            listings_unmatched: p.ingest.unmatched,
            row_errors: p.ingest.row_errors.len(),
            areas_loaded: p.areas.len(),
            areas_analysed: p.records.len(),
            areas_dropped: p.dropped.len(),
        },
        weights: p.weights.summary(),
        moran: &out.spatial.moran,
        lisa: LisaCounts {
            hh: counts[0].1,
            lh: counts[1].1,
            ll: counts[2].1,
            hl: counts[3].1,
            not_significant: p.records.len() - significant,
        },
        ols: &out.global.ols,
        lm: &out.global.lm,
        spatial_lag: &out.global.lag,
        spatial_error: &out.global.error,
        bandwidth: &out.local.bandwidth,
        gwr: &out.local.gwr,
        gwr_coefficients: out.local.gwr.coefficient_summaries(),
        clusters: &out.local.clusters,
    }
}

/// Write the run summary JSON.
pub fn write_summary_json(path: &Path, out: &RunOutput) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &build_summary(out))
        .map_err(|e| AppError::input(format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::run_analysis;

    fn small_run() -> RunOutput {
        let config = AnalysisConfig {
            demo_grid: 6,
            demo_listings_per_area: 12,
            permutations: 49,
            cluster_k_max: 0,
            clusters: 3,
            kmeans_restarts: 2,
            ..AnalysisConfig::default()
        };
        run_analysis(&config).unwrap()
    }

    #[test]
    fn exports_csv_and_json() {
        let out = small_run();
        let dir = std::env::temp_dir().join(format!("lspat-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let csv_path = dir.join("areas.csv");
        write_areas_csv(&csv_path, &out).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "id");
        assert!(headers.iter().any(|h| h == "gwr_CONSTANT"));
        let t_col = headers.iter().position(|h| h == "gwr_t_CONSTANT").unwrap();
        let tf_col = headers.iter().position(|h| h == "gwr_tf_CONSTANT").unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), out.prepared.records.len());
        for row in &rows {
            let t: f64 = row[t_col].parse().unwrap();
            let tf: f64 = row[tf_col].parse().unwrap();
            if t.abs() >= out.local.gwr.critical_t + 1e-3 {
                assert_eq!(tf, t);
            } else if t.abs() < out.local.gwr.critical_t - 1e-3 {
                assert_eq!(tf, 0.0);
            }
        }

        let json_path = dir.join("summary.json");
        write_summary_json(&json_path, &out).unwrap();
        let value: serde_json::Value = serde_json::from_reader(File::open(&json_path).unwrap()).unwrap();
        assert_eq!(value["tool"], "lspat");
        assert_eq!(value["dataset"]["areas_analysed"], out.prepared.records.len());
        assert!(value["ols"]["coefficients"].as_array().unwrap().len() > 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
