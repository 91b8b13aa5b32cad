//! Shared domain types.
//!
//! Input records stay plain structs. Enums that double as CLI values derive
//! `clap::ValueEnum` and serialize in lowercase so exported run summaries
//! read the same way the flags are spelled.

use std::path::PathBuf;

use clap::ValueEnum;
use geo::{BoundingRect, Centroid, MultiPolygon, Point, Rect};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Listing attributes that can be aggregated per area and used as regressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Variable {
    Price,
    Accommodates,
    Bedrooms,
    Bathrooms,
    Beds,
    ReviewScoresRating,
    NumberOfReviews,
    /// Derived: 1 when `room_type` is an entire home/apartment, else 0.
    EntireHomeShare,
}

impl Variable {
    pub const DEFAULT_EXPLANATORY: [Variable; 6] = [
        Variable::Accommodates,
        Variable::Bedrooms,
        Variable::Bathrooms,
        Variable::ReviewScoresRating,
        Variable::NumberOfReviews,
        Variable::EntireHomeShare,
    ];

    /// CSV column backing the variable (`room_type` for the derived share).
    pub fn column(self) -> &'static str {
        match self {
            Variable::Price => "price",
            Variable::Accommodates => "accommodates",
            Variable::Bedrooms => "bedrooms",
            Variable::Bathrooms => "bathrooms",
            Variable::Beds => "beds",
            Variable::ReviewScoresRating => "review_scores_rating",
            Variable::NumberOfReviews => "number_of_reviews",
            Variable::EntireHomeShare => "room_type",
        }
    }

    /// Short label for tables and plots.
    pub fn label(self) -> &'static str {
        match self {
            Variable::Price => "price",
            Variable::Accommodates => "accommodates",
            Variable::Bedrooms => "bedrooms",
            Variable::Bathrooms => "bathrooms",
            Variable::Beds => "beds",
            Variable::ReviewScoresRating => "rating",
            Variable::NumberOfReviews => "n_reviews",
            Variable::EntireHomeShare => "entire_home",
        }
    }
}

/// Coordinate reference system of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Crs {
    /// Geographic lon/lat degrees (EPSG:4326).
    Wgs84,
    /// British National Grid metres (EPSG:27700).
    Bng,
}

impl Crs {
    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Crs::Wgs84 => "WGS84 (EPSG:4326)",
            Crs::Bng => "British National Grid (EPSG:27700)",
        }
    }
}

/// Boundary CRS as requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CrsArg {
    /// Sniff the sibling `.prj`; fall back to the listing CRS.
    Auto,
    Wgs84,
    Bng,
}

/// How polygons become neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WeightsKind {
    /// Share at least one vertex.
    Queen,
    /// Share at least one edge.
    Rook,
    /// k nearest centroids, symmetrized by union.
    Knn,
}

/// What to do with units that have no neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IslandPolicy {
    /// Link each island to its nearest centroid (both directions).
    Nearest,
    /// Remove islands from the analysis.
    Drop,
    /// Fail the run.
    Error,
}

/// GWR distance-decay kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    Gaussian,
    Bisquare,
    Exponential,
}

impl KernelKind {
    pub fn next(self) -> Self {
        match self {
            KernelKind::Bisquare => KernelKind::Gaussian,
            KernelKind::Gaussian => KernelKind::Exponential,
            KernelKind::Exponential => KernelKind::Bisquare,
        }
    }
}

/// Criterion minimized by the bandwidth search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthCriterion {
    Aicc,
    Aic,
    Bic,
    Cv,
}

impl BandwidthCriterion {
    pub fn display_name(self) -> &'static str {
        match self {
            BandwidthCriterion::Aicc => "AICc",
            BandwidthCriterion::Aic => "AIC",
            BandwidthCriterion::Bic => "BIC",
            BandwidthCriterion::Cv => "CV",
        }
    }
}

/// A single listing after ingest and validation.
///
/// Optional attributes stay `None` when the CSV cell is blank or unparsable;
/// aggregation skips them rather than treating them as zero.
#[derive(Debug, Clone)]
pub struct Listing {
    pub id: String,
    pub price: f64,
    pub accommodates: Option<f64>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub beds: Option<f64>,
    pub review_scores_rating: Option<f64>,
    pub number_of_reviews: Option<f64>,
    pub room_type: Option<String>,
    /// Location in the listing CSV's CRS (lon/lat for WGS84).
    pub location: Point<f64>,
}

impl Listing {
    pub fn value(&self, var: Variable) -> Option<f64> {
        match var {
            Variable::Price => Some(self.price),
            Variable::Accommodates => self.accommodates,
            Variable::Bedrooms => self.bedrooms,
            Variable::Bathrooms => self.bathrooms,
            Variable::Beds => self.beds,
            Variable::ReviewScoresRating => self.review_scores_rating,
            Variable::NumberOfReviews => self.number_of_reviews,
            Variable::EntireHomeShare => self.room_type.as_deref().map(|rt| {
                if is_entire_home(rt) { 1.0 } else { 0.0 }
            }),
        }
    }
}

pub fn is_entire_home(room_type: &str) -> bool {
    let rt = room_type.trim().to_ascii_lowercase();
    rt.starts_with("entire")
}

/// An administrative polygon (borough, MSOA, ward, ...).
#[derive(Debug, Clone)]
pub struct Area {
    pub id: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
    pub centroid: Point<f64>,
    pub bbox: Rect<f64>,
}

impl Area {
    /// Build an area, caching centroid and bounding box.
    ///
    /// Returns `None` for empty geometries (no centroid).
    pub fn from_geometry(id: String, name: Option<String>, geometry: MultiPolygon<f64>) -> Option<Self> {
        let centroid = geometry.centroid()?;
        let bbox = geometry.bounding_rect()?;
        Some(Self {
            id,
            name,
            geometry,
            centroid,
            bbox,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One row per eligible area: mean of each selected attribute over the
/// listings joined to it.
#[derive(Debug, Clone, Serialize)]
pub struct AreaRecord {
    /// Index into the loaded `Area` list.
    pub area_index: usize,
    pub id: String,
    pub name: Option<String>,
    pub centroid: (f64, f64),
    pub n_listings: usize,
    pub mean_price: f64,
    /// Means in the order of `AnalysisConfig::explanatory`.
    pub means: Vec<f64>,
}

/// An area excluded from the analysis, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedArea {
    pub id: String,
    pub reason: String,
}

/// Fully resolved configuration for one analysis run.
///
/// This is derived from CLI flags (plus `.env` / environment defaults).
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisConfig {
    // Inputs.
    pub listings_path: Option<PathBuf>,
    pub boundaries_path: Option<PathBuf>,
    pub demo: bool,
    pub demo_grid: usize,
    pub demo_listings_per_area: usize,
    pub area_id_field: Option<String>,
    pub area_name_field: Option<String>,
    pub listing_crs: Crs,
    pub boundary_crs: CrsArg,
    pub max_price: Option<f64>,
    pub min_listings: usize,

    // Variables.
    pub log_price: bool,
    pub explanatory: Vec<Variable>,

    // Weights.
    pub weights: WeightsKind,
    pub knn_k: usize,
    pub islands: IslandPolicy,
    pub snap: Option<f64>,

    // Inference.
    pub permutations: usize,
    pub alpha: f64,
    pub seed: u64,

    // GWR.
    pub kernel: KernelKind,
    pub adaptive: bool,
    pub criterion: BandwidthCriterion,
    pub bandwidth: Option<f64>,
    pub bw_min: Option<f64>,
    pub bw_max: Option<f64>,
    pub bw_interval: Option<f64>,
    pub standardize: bool,

    // Clustering.
    pub clusters: usize,
    pub cluster_k_max: usize,
    pub kmeans_restarts: usize,
    pub kmeans_max_iter: usize,

    // Output.
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub export_areas: Option<PathBuf>,
    pub export_summary: Option<PathBuf>,
    pub debug_bundle: bool,
}

impl AnalysisConfig {
    /// Range checks that clap can't express.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.demo && (self.listings_path.is_none() || self.boundaries_path.is_none()) {
            return Err(AppError::input(
                "Provide both --listings <CSV> and --boundaries <SHP> (or LSPAT_LISTINGS / LSPAT_BOUNDARIES), or use --demo.",
            ));
        }
        if self.demo && self.demo_grid < 3 {
            return Err(AppError::input("--demo-grid must be >= 3."));
        }
        if self.explanatory.is_empty() {
            return Err(AppError::input("At least one explanatory variable is required."));
        }
        if self.explanatory.contains(&Variable::Price) {
            return Err(AppError::input("`price` is the response and can't also be explanatory."));
        }
        if self.min_listings == 0 {
            return Err(AppError::input("--min-listings must be >= 1."));
        }
        if let Some(max) = self.max_price {
            if !(max.is_finite() && max > 0.0) {
                return Err(AppError::input("--max-price must be a positive number."));
            }
        }
        if self.weights == WeightsKind::Knn && self.knn_k == 0 {
            return Err(AppError::input("--knn-k must be >= 1."));
        }
        if let Some(snap) = self.snap {
            if !(snap.is_finite() && snap > 0.0) {
                return Err(AppError::input("--snap must be a positive number."));
            }
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AppError::input("--alpha must be in (0, 1)."));
        }
        if let Some(bw) = self.bandwidth {
            if !(bw.is_finite() && bw > 0.0) {
                return Err(AppError::input("--bandwidth must be a positive number."));
            }
        }
        if let (Some(lo), Some(hi)) = (self.bw_min, self.bw_max) {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
                return Err(AppError::input("Bandwidth bounds must satisfy 0 < --bw-min < --bw-max."));
            }
        }
        if let Some(step) = self.bw_interval {
            if !(step.is_finite() && step > 0.0) {
                return Err(AppError::input("--bw-interval must be a positive number."));
            }
        }
        if self.clusters < 2 {
            return Err(AppError::input("--clusters must be >= 2."));
        }
        if self.cluster_k_max != 0 && self.cluster_k_max < self.clusters {
            return Err(AppError::input("--cluster-k-max must be 0 (off) or >= --clusters."));
        }
        if self.kmeans_restarts == 0 || self.kmeans_max_iter == 0 {
            return Err(AppError::input("k-means restarts and iterations must be >= 1."));
        }
        Ok(())
    }

    /// Response label used in reports.
    pub fn response_label(&self) -> &'static str {
        if self.log_price { "ln(price)" } else { "price" }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            listings_path: None,
            boundaries_path: None,
            demo: true,
            demo_grid: 12,
            demo_listings_per_area: 40,
            area_id_field: None,
            area_name_field: None,
            listing_crs: Crs::Wgs84,
            boundary_crs: CrsArg::Auto,
            max_price: None,
            min_listings: 3,
            log_price: true,
            explanatory: Variable::DEFAULT_EXPLANATORY.to_vec(),
            weights: WeightsKind::Queen,
            knn_k: 6,
            islands: IslandPolicy::Nearest,
            snap: None,
            permutations: 999,
            alpha: 0.05,
            seed: 42,
            kernel: KernelKind::Bisquare,
            adaptive: true,
            criterion: BandwidthCriterion::Aicc,
            bandwidth: None,
            bw_min: None,
            bw_max: None,
            bw_interval: None,
            standardize: true,
            clusters: 4,
            cluster_k_max: 8,
            kmeans_restarts: 10,
            kmeans_max_iter: 300,
            plot: true,
            plot_width: 72,
            plot_height: 28,
            export_areas: None,
            export_summary: None,
            debug_bundle: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_paths_without_demo_is_input_error() {
        let config = AnalysisConfig {
            demo: false,
            ..AnalysisConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INPUT);
    }

    #[test]
    fn price_cannot_be_explanatory() {
        let config = AnalysisConfig {
            explanatory: vec![Variable::Price],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn entire_home_share_is_derived_from_room_type() {
        let listing = Listing {
            id: "1".to_string(),
            price: 100.0,
            accommodates: None,
            bedrooms: None,
            bathrooms: None,
            beds: None,
            review_scores_rating: None,
            number_of_reviews: None,
            room_type: Some("Entire home/apt".to_string()),
            location: Point::new(0.0, 0.0),
        };
        assert_eq!(listing.value(Variable::EntireHomeShare), Some(1.0));
        assert!(!is_entire_home("Private room"));
    }
}
