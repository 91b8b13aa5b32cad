//! Command-line parsing for `lspat`.
//!
//! Argument parsing and command dispatch stay separate from the statistics
//! code: every flag lands in `AnalysisArgs` and is turned into an
//! `AnalysisConfig` by `app::analysis_config_from_args`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{BandwidthCriterion, Crs, CrsArg, IslandPolicy, KernelKind, Variable, WeightsKind};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "lspat", version, about = "Spatial econometrics for short-let listing prices")]
pub struct Cli {
    /// Debug-level logging (`RUST_LOG` still wins).
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Full run: Moran/LISA, OLS + spatial lag/error, GWR, clustering, plots and exports.
    Analyze(AnalysisArgs),
    /// Spatial autocorrelation only: global Moran's I, LISA and the scatterplot.
    Moran(AnalysisArgs),
    /// GWR bandwidth search only, with the full criterion trace.
    Bandwidth(AnalysisArgs),
    /// Interactive map viewer.
    ///
    /// Runs the same pipeline as `lspat analyze`, then renders layers with
    /// Ratatui. Keys switch layers, cycle the kernel and change k.
    Tui(AnalysisArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct AnalysisArgs {
    /// Listings CSV (Inside Airbnb `listings.csv` layout).
    #[arg(short = 'l', long, env = "LSPAT_LISTINGS", value_name = "CSV")]
    pub listings: Option<PathBuf>,

    /// Polygon shapefile with area boundaries (`.shp` plus `.dbf`, optional `.prj`).
    #[arg(short = 'b', long, env = "LSPAT_BOUNDARIES", value_name = "SHP")]
    pub boundaries: Option<PathBuf>,

    /// Use the synthetic demo dataset instead of files.
    #[arg(long)]
    pub demo: bool,

    /// Demo grid side (areas = side²).
    #[arg(long, default_value_t = 12)]
    pub demo_grid: usize,

    /// Demo listings per area.
    #[arg(long, default_value_t = 40)]
    pub demo_listings: usize,

    /// Attribute field holding the area id (default: first known candidate).
    #[arg(long)]
    pub id_field: Option<String>,

    /// Attribute field holding the area name.
    #[arg(long)]
    pub name_field: Option<String>,

    /// CRS of the listing coordinates.
    #[arg(long, value_enum, default_value_t = Crs::Wgs84)]
    pub listing_crs: Crs,

    /// CRS of the boundaries (`auto` reads the `.prj`).
    #[arg(long, value_enum, default_value_t = CrsArg::Auto)]
    pub boundary_crs: CrsArg,

    /// Drop listings priced above this value.
    #[arg(long)]
    pub max_price: Option<f64>,

    /// Minimum listings for an area to be analysed.
    #[arg(long, default_value_t = 3)]
    pub min_listings: usize,

    /// Model the mean price instead of its natural log.
    #[arg(long)]
    pub no_log_price: bool,

    /// Explanatory variables (comma separated).
    #[arg(long = "vars", value_enum, value_delimiter = ',')]
    pub vars: Vec<Variable>,

    /// Spatial weights.
    #[arg(short = 'w', long, value_enum, default_value_t = WeightsKind::Queen)]
    pub weights: WeightsKind,

    /// Neighbors for KNN weights.
    #[arg(long, default_value_t = 6)]
    pub knn_k: usize,

    /// What to do with areas that have no contiguity neighbors.
    #[arg(long, value_enum, default_value_t = IslandPolicy::Nearest)]
    pub islands: IslandPolicy,

    /// Vertex snapping tolerance for contiguity (CRS units).
    #[arg(long)]
    pub snap: Option<f64>,

    /// Permutations for Moran/LISA pseudo p-values (0 disables).
    #[arg(long, default_value_t = 999)]
    pub permutations: usize,

    /// Significance level.
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Random seed (demo data, permutations, k-means).
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// GWR kernel.
    #[arg(short = 'k', long, value_enum, default_value_t = KernelKind::Bisquare)]
    pub kernel: KernelKind,

    /// Fixed-distance bandwidth instead of nearest-neighbor count.
    #[arg(long)]
    pub fixed: bool,

    /// Bandwidth selection criterion.
    #[arg(long, value_enum, default_value_t = BandwidthCriterion::Aicc)]
    pub criterion: BandwidthCriterion,

    /// Use this bandwidth and skip the search.
    #[arg(long)]
    pub bandwidth: Option<f64>,

    /// Lower bound of the bandwidth search.
    #[arg(long)]
    pub bw_min: Option<f64>,

    /// Upper bound of the bandwidth search.
    #[arg(long)]
    pub bw_max: Option<f64>,

    /// Step for an interval search instead of golden section.
    #[arg(long)]
    pub bw_interval: Option<f64>,

    /// Fit GWR on raw rather than z-standardized variables.
    #[arg(long)]
    pub no_standardize: bool,

    /// k-means clusters on local coefficients.
    #[arg(short = 'c', long, default_value_t = 4)]
    pub clusters: usize,

    /// Largest k for the elbow/silhouette scan (0 disables).
    #[arg(long, default_value_t = 8)]
    pub cluster_k_max: usize,

    /// k-means restarts.
    #[arg(long, default_value_t = 10)]
    pub restarts: usize,

    /// k-means iteration cap.
    #[arg(long, default_value_t = 300)]
    pub max_iter: usize,

    /// Disable terminal plots.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 72)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 28)]
    pub height: usize,

    /// Write per-area results to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_areas: Option<PathBuf>,

    /// Write a JSON run summary.
    #[arg(long, value_name = "JSON")]
    pub export_summary: Option<PathBuf>,

    /// Write a markdown diagnostics bundle under `debug/`.
    #[arg(long)]
    pub debug_bundle: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyze_with_vars_and_kernel() {
        let cli = Cli::parse_from([
            "lspat",
            "analyze",
            "--demo",
            "--vars",
            "accommodates,bedrooms",
            "-k",
            "gaussian",
            "--fixed",
        ]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert!(args.demo);
        assert_eq!(args.vars, vec![Variable::Accommodates, Variable::Bedrooms]);
        assert_eq!(args.kernel, KernelKind::Gaussian);
        assert!(args.fixed);
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["lspat", "moran", "--demo", "-v"]);
        assert!(cli.verbose);
    }
}
