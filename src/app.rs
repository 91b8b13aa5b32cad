//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real entry point:
//! - loads `.env` and parses CLI arguments
//! - installs the logger
//! - runs the requested pipeline stages
//! - prints reports/plots and writes optional exports

use std::path::Path;

use clap::Parser;
use tracing::info;

use crate::cli::{AnalysisArgs, Command};
use crate::domain::{AnalysisConfig, Variable};
use crate::error::AppError;
use crate::plot::MapLayer;

pub mod pipeline;

/// Entry point for the `lspat` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    // `lspat` and `lspat --demo` behave like `lspat tui ...`; clap needs the
    // subcommand name, so argv is rewritten before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    if !matches!(cli.command, Command::Tui(_)) {
        crate::logging::init_cli_logger(cli.verbose);
    }

    match cli.command {
        Command::Analyze(args) => handle_analyze(&args),
        Command::Moran(args) => handle_moran(&args),
        Command::Bandwidth(args) => handle_bandwidth(&args),
        Command::Tui(args) => crate::tui::run(analysis_config_from_args(&args)),
    }
}

fn handle_analyze(args: &AnalysisArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args);
    let run = pipeline::run_analysis(&config)?;

    println!("{}", crate::report::format_run_report(&run));

    if config.plot {
        let p = &run.prepared;
        let pairs = crate::stats::moran_scatter(&p.response, &p.weights);
        println!(
            "{}",
            crate::plot::render_moran_scatter(&pairs, run.spatial.moran.i, config.plot_width, config.plot_height / 2)
        );
        for layer in [MapLayer::Response, MapLayer::Lisa, MapLayer::LocalR2, MapLayer::Cluster] {
            println!(
                "{}",
                crate::plot::render_layer_map(&run, layer, config.plot_width, config.plot_height)
            );
        }
    }

    if let Some(path) = &config.export_areas {
        crate::io::export::write_areas_csv(path, &run)?;
        info!(path = %path.display(), "wrote area CSV");
    }
    if let Some(path) = &config.export_summary {
        crate::io::export::write_summary_json(path, &run)?;
        info!(path = %path.display(), "wrote run summary");
    }
    if config.debug_bundle {
        let path = crate::debug::write_debug_bundle(&run, Path::new("debug"))?;
        info!(path = %path.display(), "wrote debug bundle");
    }

    Ok(())
}

fn handle_moran(args: &AnalysisArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args);
    let prepared = pipeline::prepare(&config)?;
    let spatial = pipeline::spatial_stats(&prepared)?;

    print!("{}", crate::report::format_dataset(&prepared));
    print!("{}", crate::report::format_weights(&prepared.weights));
    println!("{}", crate::report::format_spatial(&spatial, &prepared));

    if config.plot {
        let pairs = crate::stats::moran_scatter(&prepared.response, &prepared.weights);
        println!(
            "{}",
            crate::plot::render_moran_scatter(&pairs, spatial.moran.i, config.plot_width, config.plot_height / 2)
        );
        println!(
            "{}",
            crate::plot::render_lisa_map(&prepared.centroids, &spatial.lisa, config.plot_width, config.plot_height)
        );
    }
    Ok(())
}

fn handle_bandwidth(args: &AnalysisArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args);
    let prepared = pipeline::prepare(&config)?;
    let data = pipeline::gwr_data(&prepared)?;
    let search = pipeline::bandwidth_search(&prepared, &data, config.kernel)?;

    print!("{}", crate::report::format_dataset(&prepared));
    println!("{}", crate::report::format_bandwidth(&search));
    Ok(())
}

pub fn analysis_config_from_args(args: &AnalysisArgs) -> AnalysisConfig {
    // Paths alone mean file mode; neither path means the demo.
    let demo = args.demo || (args.listings.is_none() && args.boundaries.is_none());
    AnalysisConfig {
        listings_path: args.listings.clone(),
        boundaries_path: args.boundaries.clone(),
        demo,
        demo_grid: args.demo_grid,
        demo_listings_per_area: args.demo_listings,
        area_id_field: args.id_field.clone(),
        area_name_field: args.name_field.clone(),
        listing_crs: args.listing_crs,
        boundary_crs: args.boundary_crs,
        max_price: args.max_price,
        min_listings: args.min_listings,
        log_price: !args.no_log_price,
        explanatory: if args.vars.is_empty() {
            Variable::DEFAULT_EXPLANATORY.to_vec()
        } else {
            args.vars.clone()
        },
        weights: args.weights,
        knn_k: args.knn_k,
        islands: args.islands,
        snap: args.snap,
        permutations: args.permutations,
        alpha: args.alpha,
        seed: args.seed,
        kernel: args.kernel,
        adaptive: !args.fixed,
        criterion: args.criterion,
        bandwidth: args.bandwidth,
        bw_min: args.bw_min,
        bw_max: args.bw_max,
        bw_interval: args.bw_interval,
        standardize: !args.no_standardize,
        clusters: args.clusters,
        cluster_k_max: args.cluster_k_max,
        kmeans_restarts: args.restarts,
        kmeans_max_iter: args.max_iter,
        plot: !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_areas: args.export_areas.clone(),
        export_summary: args.export_summary.clone(),
        debug_bundle: args.debug_bundle,
    }
}

/// Rewrite argv so `lspat` defaults to `lspat tui`.
///
/// - `lspat`                        -> `lspat tui`
/// - `lspat --demo ...`             -> `lspat tui --demo ...`
/// - `lspat --help/--version/-h`    -> unchanged
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("tui".to_string());
        return argv;
    };

    if matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help") {
        return argv;
    }
    if matches!(arg1.as_str(), "analyze" | "moran" | "bandwidth" | "tui") {
        return argv;
    }
    if arg1.starts_with('-') {
        argv.insert(1, "tui".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_and_flag_only_invocations_become_tui() {
        assert_eq!(rewrite_args(argv(&["lspat"])), argv(&["lspat", "tui"]));
        assert_eq!(
            rewrite_args(argv(&["lspat", "--demo", "-k", "gaussian"])),
            argv(&["lspat", "tui", "--demo", "-k", "gaussian"])
        );
        assert_eq!(rewrite_args(argv(&["lspat", "--help"])), argv(&["lspat", "--help"]));
        assert_eq!(rewrite_args(argv(&["lspat", "moran", "--demo"])), argv(&["lspat", "moran", "--demo"]));
    }

    #[test]
    fn args_map_onto_config() {
        let cli = Cli::parse_from([
            "lspat",
            "analyze",
            "--demo",
            "--fixed",
            "--no-log-price",
            "--no-standardize",
            "--clusters",
            "3",
        ]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let config = analysis_config_from_args(&args);
        assert!(config.demo);
        assert!(!config.adaptive);
        assert!(!config.log_price);
        assert!(!config.standardize);
        assert_eq!(config.clusters, 3);
        assert_eq!(config.explanatory, Variable::DEFAULT_EXPLANATORY.to_vec());
        assert!(config.validate().is_ok());
    }
}
