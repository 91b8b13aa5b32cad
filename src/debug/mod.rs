//! Debug bundle writer for inspecting weights, dropped inputs and model fits.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::app::pipeline::RunOutput;
use crate::error::AppError;

/// Write a markdown bundle into `dir` and return its path.
pub fn write_debug_bundle(out: &RunOutput, dir: &Path) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::input(format!("Failed to create debug dir: {e}")))?;

    let p = &out.prepared;
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("lspat_debug_seed{}_{ts}.md", p.config.seed));
    let file = File::create(&path).map_err(|e| AppError::input(format!("Failed to create debug file: {e}")))?;
    let mut file = BufWriter::new(file);
    let werr = |e: std::io::Error| AppError::input(format!("Failed to write debug: {e}"));

    writeln!(file, "# lspat debug bundle").map_err(werr)?;
    writeln!(file, "- generated: {}", Local::now().to_rfc3339()).map_err(werr)?;
    writeln!(file, "- source: {}", p.source.description).map_err(werr)?;
    writeln!(file, "- crs: {} ({})", p.source.crs.display_name(), p.source.crs_source).map_err(werr)?;
    writeln!(file, "- seed: {}", p.config.seed).map_err(werr)?;
    writeln!(
        file,
        "- weights: {:?} islands={:?} snap={:?} knn_k={}",
        p.config.weights, p.config.islands, p.config.snap, p.config.knn_k
    )
    .map_err(werr)?;
    writeln!(
        file,
        "- gwr: kernel={:?} adaptive={} criterion={} standardize={}",
        out.local.gwr.kernel,
        p.config.adaptive,
        p.config.criterion.display_name(),
        p.config.standardize
    )
    .map_err(werr)?;

    writeln!(file, "\n## Neighbor cardinality").map_err(werr)?;
    writeln!(file, "| neighbors | areas |").map_err(werr)?;
    writeln!(file, "| - | - |").map_err(werr)?;
    for (card, count) in p.weights.cardinality_histogram() {
        writeln!(file, "| {card} | {count} |").map_err(werr)?;
    }
    if !p.weights.linked_islands.is_empty() {
        let ids: Vec<&str> = p
            .weights
            .linked_islands
            .iter()
            .map(|&i| p.records[i].id.as_str())
            .collect();
        writeln!(file, "\nIslands linked to nearest neighbor: {}", ids.join(", ")).map_err(werr)?;
    }

    writeln!(file, "\n## Dropped areas ({})", p.dropped.len()).map_err(werr)?;
    for d in &p.dropped {
        writeln!(file, "- {}: {}", d.id, d.reason).map_err(werr)?;
    }

    writeln!(file, "\n## Listing row errors ({})", p.ingest.row_errors.len()).map_err(werr)?;
    for e in &p.ingest.row_errors {
        writeln!(
            file,
            "- line {} [{}]: {}",
            e.line,
            e.id.as_deref().unwrap_or("-"),
            e.message
        )
        .map_err(werr)?;
    }

    writeln!(file, "\n## Bandwidth trace").map_err(werr)?;
    writeln!(file, "| bandwidth | {} |", out.local.bandwidth.criterion.display_name()).map_err(werr)?;
    writeln!(file, "| - | - |").map_err(werr)?;
    for t in &out.local.bandwidth.trace {
        writeln!(file, "| {:.3} | {:.6} |", t.bandwidth, t.score).map_err(werr)?;
    }

    writeln!(file, "\n## Areas").map_err(werr)?;
    let names = &out.local.gwr.names;
    writeln!(
        file,
        "| id | n | response | lisa | ols_resid | gwr_resid | local_r2 | cluster | {} |",
        names.join(" | ")
    )
    .map_err(werr)?;
    writeln!(file, "|{}", " - |".repeat(8 + names.len())).map_err(werr)?;
    for (i, r) in p.records.iter().enumerate() {
        writeln!(
            file,
            "| {} | {} | {:.4} | {} | {:.4} | {:.4} | {:.3} | {} | {} |",
            r.id,
            r.n_listings,
            p.response[i],
            out.spatial.lisa.label(i),
            out.global.ols.residuals[i],
            out.local.gwr.residuals[i],
            out.local.gwr.local_r2[i],
            out.local.clusters.kmeans.labels[i],
            fmt_row(out.local.gwr.params.row(i).iter())
        )
        .map_err(werr)?;
    }

    file.flush().map_err(werr)?;
    Ok(path)
}

fn fmt_row<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    let parts: Vec<String> = values.map(|v| format!("{v:.4}")).collect();
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::run_analysis;
    use crate::domain::AnalysisConfig;

    #[test]
    fn bundle_lists_every_area() {
        let config = AnalysisConfig {
            demo_grid: 5,
            demo_listings_per_area: 10,
            permutations: 19,
            clusters: 2,
            cluster_k_max: 0,
            kmeans_restarts: 2,
            ..AnalysisConfig::default()
        };
        let out = run_analysis(&config).unwrap();
        let dir = std::env::temp_dir().join(format!("lspat-debug-{}", std::process::id()));
        let path = write_debug_bundle(&out, &dir).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# lspat debug bundle"));
        assert!(text.contains("## Neighbor cardinality"));
        for r in &out.prepared.records {
            assert!(text.contains(&format!("| {} |", r.id)));
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
