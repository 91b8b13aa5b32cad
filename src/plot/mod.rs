//! Map layers and terminal plots.

pub mod ascii;

pub use ascii::*;

use crate::app::pipeline::RunOutput;

/// Quantity shown on a centroid map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLayer {
    Response,
    /// Local GWR coefficient by column index (0 = intercept).
    Coefficient(usize),
    LocalR2,
    Cluster,
    Lisa,
}

/// Values behind a layer, one per analysed area.
#[derive(Debug, Clone)]
pub enum LayerValues {
    Continuous(Vec<f64>),
    /// Category index per area plus category labels.
    Categorical(Vec<usize>, Vec<String>),
}

pub const LISA_CODES: [&str; 5] = ["HH", "LH", "LL", "HL", "ns"];

impl MapLayer {
    /// Every layer available for a run, in picker order.
    pub fn all(k: usize) -> Vec<MapLayer> {
        let mut out = vec![MapLayer::Response];
        out.extend((0..k).map(MapLayer::Coefficient));
        out.extend([MapLayer::LocalR2, MapLayer::Cluster, MapLayer::Lisa]);
        out
    }

    pub fn title(self, run: &RunOutput) -> String {
        match self {
            MapLayer::Response => run.prepared.config.response_label().to_string(),
            MapLayer::Coefficient(j) => {
                let name = run.local.gwr.names.get(j).map(String::as_str).unwrap_or("?");
                format!("GWR {name}")
            }
            MapLayer::LocalR2 => "GWR local R2".to_string(),
            MapLayer::Cluster => format!("cluster (k={})", run.local.clusters.kmeans.k),
            MapLayer::Lisa => "LISA".to_string(),
        }
    }

    pub fn values(self, run: &RunOutput) -> LayerValues {
        match self {
            MapLayer::Response => LayerValues::Continuous(run.prepared.response.clone()),
            MapLayer::Coefficient(j) => LayerValues::Continuous(run.local.gwr.column(j)),
            MapLayer::LocalR2 => LayerValues::Continuous(run.local.gwr.local_r2.clone()),
            MapLayer::Cluster => {
                let k = run.local.clusters.kmeans.k;
                LayerValues::Categorical(
                    run.local.clusters.kmeans.labels.clone(),
                    (0..k).map(|c| c.to_string()).collect(),
                )
            }
            MapLayer::Lisa => {
                let lisa = &run.spatial.lisa;
                let idx = (0..lisa.local_i.len())
                    .map(|i| {
                        let code = lisa.label(i);
                        LISA_CODES.iter().position(|c| *c == code).unwrap_or(4)
                    })
                    .collect();
                LayerValues::Categorical(idx, LISA_CODES.iter().map(|s| s.to_string()).collect())
            }
        }
    }
}

/// Quantile class (0..classes) of each value plus the upper break of every
/// class but the last. Non-finite values get class 0.
pub fn quantile_classes(values: &[f64], classes: usize) -> (Vec<usize>, Vec<f64>) {
    let classes = classes.max(1);
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return (vec![0; values.len()], Vec::new());
    }
    let breaks: Vec<f64> = (1..classes)
        .map(|c| sorted[(c * sorted.len() / classes).saturating_sub(1)])
        .collect();
    let class = values
        .iter()
        .map(|v| {
            if !v.is_finite() {
                0
            } else {
                breaks.iter().take_while(|b| v > *b).count()
            }
        })
        .collect();
    (class, breaks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_classes_split_evenly() {
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let (class, breaks) = quantile_classes(&values, 5);
        assert_eq!(breaks.len(), 4);
        assert_eq!(class[0], 0);
        assert_eq!(class[9], 4);
        let mut counts = [0usize; 5];
        for c in class {
            counts[c] += 1;
        }
        assert!(counts.iter().all(|&c| c == 2), "{counts:?}");
    }

    #[test]
    fn layers_cover_every_coefficient() {
        let layers = MapLayer::all(3);
        assert_eq!(layers.len(), 7);
        assert_eq!(layers[2], MapLayer::Coefficient(1));
    }
}
