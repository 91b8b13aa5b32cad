//! Shared analysis pipeline used by both CLI and TUI front-ends.
//!
//! load -> reproject -> join -> aggregate -> weights -> Moran/LISA
//! -> OLS + LM + ML lag/error -> GWR bandwidth + fit -> k-means
//!
//! Each stage is a separate function so subcommands can stop early and the
//! TUI can refit the local stages without reloading data.

use std::time::Instant;

use geo::{MultiPolygon, Point};
use tracing::{info, warn};

use crate::cluster::{ClusterResult, KMeansOptions, cluster_columns};
use crate::data::generate_sample;
use crate::domain::{AnalysisConfig, Area, AreaRecord, Crs, DroppedArea, KernelKind, Listing};
use crate::error::AppError;
use crate::gwr::{BandwidthSearch, GwrFit, GwrModel, SearchOptions, select_bandwidth, supplied_bandwidth};
use crate::io::{ListingStats, RowError, listing_stats, load_boundaries, load_listings};
use crate::models::{
    LmDiagnostics, OlsFit, RegressionData, SpatialErrorFit, SpatialLagFit, fit_ols, fit_spatial_error,
    fit_spatial_lag, lm_diagnostics,
};
use crate::spatial::{
    DEFAULT_SNAP_GEOGRAPHIC, DEFAULT_SNAP_PROJECTED, SpatialWeights, aggregate_by_area, build_weights,
    join_points_to_areas, reproject,
};
use crate::stats::{LisaResult, MoranGlobal, moran_global, moran_local};

/// Where the data came from and in which CRS it was analysed.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub description: String,
    pub crs: Crs,
    pub crs_source: String,
    pub id_field: Option<String>,
}

/// Row accounting from ingest through the spatial join.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub rows_read: usize,
    pub rows_filtered: usize,
    pub row_errors: Vec<RowError>,
    pub listings_used: usize,
    pub unmatched: usize,
    pub stats: Option<ListingStats>,
}

/// Data ready for modelling: eligible areas, their weights and the response.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub config: AnalysisConfig,
    pub source: DataSource,
    pub ingest: IngestSummary,
    /// Every loaded area (indexable by `AreaRecord::area_index`).
    pub areas: Vec<Area>,
    /// Areas analysed, aligned with `weights`.
    pub records: Vec<AreaRecord>,
    pub dropped: Vec<DroppedArea>,
    pub weights: SpatialWeights,
    /// Response per record (log mean price by default).
    pub response: Vec<f64>,
    pub centroids: Vec<Point<f64>>,
    pub geographic: bool,
}

#[derive(Debug, Clone)]
pub struct SpatialStats {
    pub moran: MoranGlobal,
    pub lisa: LisaResult,
}

#[derive(Debug, Clone)]
pub struct GlobalModels {
    pub data: RegressionData,
    pub ols: OlsFit,
    pub lm: LmDiagnostics,
    pub lag: SpatialLagFit,
    pub error: SpatialErrorFit,
}

#[derive(Debug, Clone)]
pub struct LocalModel {
    pub data: RegressionData,
    pub bandwidth: BandwidthSearch,
    pub gwr: GwrFit,
    pub clusters: ClusterResult,
}

/// All computed outputs of a single `lspat analyze` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub prepared: Prepared,
    pub spatial: SpatialStats,
    pub global: GlobalModels,
    pub local: LocalModel,
}

/// Execute every stage.
pub fn run_analysis(config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    let started = Instant::now();
    let prepared = prepare(config)?;
    let spatial = spatial_stats(&prepared)?;
    let global = global_models(&prepared)?;
    let local = local_model(&prepared, config.kernel, config.clusters)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "analysis complete");
    Ok(RunOutput {
        prepared,
        spatial,
        global,
        local,
    })
}

/// Load inputs (or the demo), join, aggregate and build weights.
pub fn prepare(config: &AnalysisConfig) -> Result<Prepared, AppError> {
    config.validate()?;

    let (listings, areas, source, mut ingest) = load_inputs(config)?;

    let join = join_points_to_areas(&listings.iter().map(|l| l.location).collect::<Vec<_>>(), &areas);
    if join.matched == 0 {
        return Err(AppError::data(format!(
            "None of the {} listings fall inside any boundary polygon; check that listings and boundaries share a CRS (boundaries: {}).",
            listings.len(),
            source.crs.display_name()
        )));
    }
    if join.unmatched > 0 {
        warn!(unmatched = join.unmatched, "listings outside every boundary polygon");
    }
    ingest.unmatched = join.unmatched;
    info!(matched = join.matched, unmatched = join.unmatched, "spatial join done");

    let aggregation = aggregate_by_area(
        &listings,
        &join.assignment,
        &areas,
        &config.explanatory,
        config.min_listings,
    );
    let mut dropped = aggregation.dropped;
    let mut records = aggregation.records;
    if !dropped.is_empty() {
        warn!(dropped = dropped.len(), "areas excluded from the analysis");
    }
    ensure_enough_areas(records.len(), config.explanatory.len(), "eligible")?;

    let geographic = source.crs.is_geographic();
    let snap = config.snap.unwrap_or(if geographic {
        DEFAULT_SNAP_GEOGRAPHIC
    } else {
        DEFAULT_SNAP_PROJECTED
    });
    let geoms: Vec<&MultiPolygon<f64>> = records.iter().map(|r| &areas[r.area_index].geometry).collect();
    let cents: Vec<Point<f64>> = records.iter().map(|r| areas[r.area_index].centroid).collect();
    let build = build_weights(&geoms, &cents, config.weights, config.knn_k, snap, geographic, config.islands)?;

    if !build.dropped_islands.is_empty() {
        for &i in &build.dropped_islands {
            dropped.push(DroppedArea {
                id: records[i].id.clone(),
                reason: "island (no neighbors)".to_string(),
            });
        }
        records = build.kept.iter().map(|&i| records[i].clone()).collect();
        ensure_enough_areas(records.len(), config.explanatory.len(), "connected")?;
    }
    let centroids: Vec<Point<f64>> = build.kept.iter().map(|&i| cents[i]).collect();

    let response: Vec<f64> = records
        .iter()
        .map(|r| if config.log_price { r.mean_price.ln() } else { r.mean_price })
        .collect();

    info!(
        areas = records.len(),
        dropped = dropped.len(),
        weights = ?config.weights,
        "data prepared"
    );

    Ok(Prepared {
        config: config.clone(),
        source,
        ingest,
        areas,
        records,
        dropped,
        weights: build.weights,
        response,
        centroids,
        geographic,
    })
}

/// Models need a few more areas than coefficients.
fn ensure_enough_areas(areas: usize, explanatory: usize, kind: &str) -> Result<(), AppError> {
    let min_areas = explanatory + 4;
    if areas < min_areas {
        return Err(AppError::data(format!(
            "Only {areas} {kind} area(s); at least {min_areas} are needed for {explanatory} explanatory variable(s)."
        )));
    }
    Ok(())
}

fn load_inputs(config: &AnalysisConfig) -> Result<(Vec<Listing>, Vec<Area>, DataSource, IngestSummary), AppError> {
    if config.demo {
        let sample = generate_sample(config)?;
        let n = sample.listings.len();
        let source = DataSource {
            description: format!(
                "synthetic demo ({}×{} grid, seed {})",
                config.demo_grid, config.demo_grid, config.seed
            ),
            crs: sample.crs,
            crs_source: "demo".to_string(),
            id_field: None,
        };
        let listings: Vec<Listing> = match config.max_price {
            Some(max) => sample.listings.into_iter().filter(|l| l.price <= max).collect(),
            None => sample.listings,
        };
        let ingest = IngestSummary {
            rows_read: n,
            rows_filtered: n - listings.len(),
            row_errors: Vec::new(),
            listings_used: listings.len(),
            unmatched: 0,
            stats: listing_stats(&listings),
        };
        return Ok((listings, sample.areas, source, ingest));
    }

    let (Some(listings_path), Some(boundaries_path)) = (&config.listings_path, &config.boundaries_path) else {
        return Err(AppError::input("Listings and boundaries paths are required unless --demo is set."));
    };

    let layer = load_boundaries(
        boundaries_path,
        config.boundary_crs,
        config.listing_crs,
        config.area_id_field.as_deref(),
        config.area_name_field.as_deref(),
    )?;
    let ingested = load_listings(listings_path, config.listing_crs, &config.explanatory, config.max_price)?;

    let mut row_errors = ingested.row_errors;
    let mut listings = Vec::with_capacity(ingested.listings.len());
    for mut l in ingested.listings {
        match reproject(l.location, config.listing_crs, layer.crs) {
            Some(p) => {
                l.location = p;
                listings.push(l);
            }
            None => {
                return Err(AppError::input(format!(
                    "Cannot reproject listings from {} to {}; only WGS84 -> BNG is supported.",
                    config.listing_crs.display_name(),
                    layer.crs.display_name()
                )));
            }
        }
    }
    listings.retain(|l| {
        let ok = l.location.x().is_finite() && l.location.y().is_finite();
        if !ok {
            row_errors.push(RowError {
                line: 0,
                id: Some(l.id.clone()),
                message: "Reprojection produced a non-finite coordinate.".to_string(),
            });
        }
        ok
    });

    let source = DataSource {
        description: format!("{} + {}", listings_path.display(), boundaries_path.display()),
        crs: layer.crs,
        crs_source: layer.crs_source,
        id_field: Some(layer.id_field),
    };
    let ingest = IngestSummary {
        rows_read: ingested.rows_read,
        rows_filtered: ingested.rows_filtered,
        row_errors,
        listings_used: listings.len(),
        unmatched: 0,
        stats: listing_stats(&listings),
    };
    Ok((listings, layer.areas, source, ingest))
}

/// Global Moran's I and LISA of the response.
pub fn spatial_stats(prepared: &Prepared) -> Result<SpatialStats, AppError> {
    let config = &prepared.config;
    let moran = moran_global(&prepared.response, &prepared.weights, config.permutations, config.seed)?;
    let lisa = moran_local(
        &prepared.response,
        &prepared.weights,
        config.permutations,
        config.seed,
        config.alpha,
    )?;
    info!(i = moran.i, p_norm = moran.p_norm, "moran's I computed");
    Ok(SpatialStats { moran, lisa })
}

/// OLS, LM diagnostics and the two ML spatial models on raw area means.
pub fn global_models(prepared: &Prepared) -> Result<GlobalModels, AppError> {
    let data = RegressionData::from_records(&prepared.records, &prepared.config, false)?;
    let ols = fit_ols(&data)?;
    let lm = lm_diagnostics(&data, &ols, &prepared.weights)?;
    let lag = fit_spatial_lag(&data, &prepared.weights, &ols)?;
    let error = fit_spatial_error(&data, &prepared.weights, &ols)?;
    info!(
        ols_r2 = ols.r2,
        rho = lag.rho.estimate,
        lambda = error.lambda.estimate,
        "global models fitted"
    );
    Ok(GlobalModels {
        data,
        ols,
        lm,
        lag,
        error,
    })
}

/// Regression data for GWR (standardized when configured).
pub fn gwr_data(prepared: &Prepared) -> Result<RegressionData, AppError> {
    RegressionData::from_records(&prepared.records, &prepared.config, prepared.config.standardize)
}

/// Bandwidth selection only (or the supplied bandwidth).
pub fn bandwidth_search(prepared: &Prepared, data: &RegressionData, kernel: KernelKind) -> Result<BandwidthSearch, AppError> {
    let config = &prepared.config;
    let model = GwrModel::new(data, &prepared.centroids, prepared.geographic, kernel)?;
    if let Some(bw) = config.bandwidth {
        return Ok(supplied_bandwidth(&model, bw, config.adaptive, config.criterion));
    }
    let opts = SearchOptions {
        bw_min: config.bw_min,
        bw_max: config.bw_max,
        interval: config.bw_interval,
        ..SearchOptions::new(config.criterion, config.adaptive)
    };
    select_bandwidth(&model, &opts)
}

/// GWR with the selected bandwidth, then k-means on the local slopes.
pub fn local_model(prepared: &Prepared, kernel: KernelKind, clusters: usize) -> Result<LocalModel, AppError> {
    let config = &prepared.config;
    let data = gwr_data(prepared)?;
    let bandwidth = bandwidth_search(prepared, &data, kernel)?;
    let model = GwrModel::new(&data, &prepared.centroids, prepared.geographic, kernel)?;
    let gwr = model.fit(bandwidth.best, config.alpha)?;
    let clusters = cluster_slopes(prepared, &gwr, clusters)?;

    Ok(LocalModel {
        data,
        bandwidth,
        gwr,
        clusters,
    })
}

/// k-means on the local slopes of a GWR fit; the intercept only shifts levels.
pub fn cluster_slopes(prepared: &Prepared, gwr: &GwrFit, clusters: usize) -> Result<ClusterResult, AppError> {
    let config = &prepared.config;
    let (names, columns): (Vec<String>, Vec<Vec<f64>>) = (1..gwr.k).map(|j| (gwr.names[j].clone(), gwr.column(j))).unzip();
    let opts = KMeansOptions {
        k: clusters.min(prepared.records.len()),
        n_init: config.kmeans_restarts,
        max_iter: config.kmeans_max_iter,
        seed: config.seed,
    };
    cluster_columns(names, &columns, true, &opts, config.cluster_k_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IslandPolicy, WeightsKind};

    fn demo_config() -> AnalysisConfig {
        AnalysisConfig {
            demo_grid: 8,
            demo_listings_per_area: 15,
            permutations: 99,
            cluster_k_max: 4,
            kmeans_restarts: 3,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn demo_runs_end_to_end() {
        let out = run_analysis(&demo_config()).unwrap();
        let n = out.prepared.records.len();
        assert_eq!(n, 64);
        assert_eq!(out.prepared.weights.n(), n);
        assert_eq!(out.spatial.lisa.local_i.len(), n);
        // The demo surface is spatially autocorrelated.
        assert!(out.spatial.moran.i > 0.0);
        assert_eq!(out.global.ols.n, n);
        assert_eq!(out.local.gwr.n, n);
        assert_eq!(out.local.clusters.kmeans.labels.len(), n);
        assert_eq!(out.local.clusters.elbow.len(), 3);
        assert!(out.local.bandwidth.trace.len() >= 2);
    }

    #[test]
    fn bandwidth_stage_respects_supplied_value() {
        let config = AnalysisConfig {
            bandwidth: Some(30.0),
            ..demo_config()
        };
        let prepared = prepare(&config).unwrap();
        let data = gwr_data(&prepared).unwrap();
        let search = bandwidth_search(&prepared, &data, KernelKind::Bisquare).unwrap();
        assert_eq!(search.best, crate::gwr::Bandwidth::Adaptive(30));
        assert_eq!(search.trace.len(), 1);
    }

    #[test]
    fn high_min_listings_leaves_too_few_areas() {
        let config = AnalysisConfig {
            min_listings: 10_000,
            ..demo_config()
        };
        assert_eq!(prepare(&config).unwrap_err().exit_code(), crate::error::EXIT_DATA);
    }

    #[test]
    fn area_floor_scales_with_explanatory_count() {
        assert!(ensure_enough_areas(6, 2, "eligible").is_ok());
        let err = ensure_enough_areas(5, 2, "connected").unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
        assert!(err.to_string().contains("5 connected area(s)"));
    }

    #[test]
    fn knn_weights_have_no_islands() {
        let config = AnalysisConfig {
            weights: WeightsKind::Knn,
            knn_k: 4,
            islands: IslandPolicy::Error,
            ..demo_config()
        };
        let prepared = prepare(&config).unwrap();
        assert!(prepared.weights.islands().is_empty());
        assert!(spatial_stats(&prepared).is_ok());
    }
}
