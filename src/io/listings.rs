//! Listing CSV ingest and normalization.
//!
//! Turns an Inside-Airbnb style `listings.csv` into validated `Listing`s.
//! Required columns are checked up front (exit code 2); individual bad rows
//! are skipped and reported as `RowError`s.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use geo::Point;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{Crs, Listing, Variable};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Summary stats about the listings actually used.
#[derive(Debug, Clone, Serialize)]
pub struct ListingStats {
    pub n_listings: usize,
    pub price_min: f64,
    pub price_max: f64,
    pub price_median: f64,
    pub entire_home_share: f64,
}

#[derive(Debug, Clone)]
pub struct IngestedListings {
    pub listings: Vec<Listing>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    /// Rows dropped by the `max_price` filter.
    pub rows_filtered: usize,
}

/// Column names for coordinates under each CRS.
fn coordinate_columns(crs: Crs, header_map: &HashMap<String, usize>) -> Result<(&'static str, &'static str), AppError> {
    let candidates: &[(&str, &str)] = match crs {
        Crs::Wgs84 => &[("longitude", "latitude"), ("lon", "lat"), ("lng", "lat")],
        Crs::Bng => &[("easting", "northing"), ("x", "y")],
    };
    candidates
        .iter()
        .copied()
        .find(|(x, y)| header_map.contains_key(*x) && header_map.contains_key(*y))
        .ok_or_else(|| {
            let (x, y) = candidates[0];
            AppError::input(format!("Missing coordinate columns for {}: `{x}` and `{y}`.", crs.display_name()))
        })
}

/// Load and validate listings from `path`.
pub fn load_listings(
    path: &Path,
    crs: Crs,
    explanatory: &[Variable],
    max_price: Option<f64>,
) -> Result<IngestedListings, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open listings CSV '{}': {e}", path.display())))?;
    read_listings(file, crs, explanatory, max_price)
}

/// Same as [`load_listings`], from any reader.
pub fn read_listings<R: std::io::Read>(
    reader: R,
    crs: Crs,
    explanatory: &[Variable],
    max_price: Option<f64>,
) -> Result<IngestedListings, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for required in ["id", "price"] {
        if !header_map.contains_key(required) {
            return Err(AppError::input(format!("Missing required column: `{required}`")));
        }
    }
    let (x_col, y_col) = coordinate_columns(crs, &header_map)?;
    ensure_variable_columns_exist(explanatory, &header_map)?;

    let mut listings = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_filtered = 0usize;

    let mut next_line = 2usize;
    for result in reader.records() {
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = source_line(e.position(), next_line);
                next_line = line + 1;
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let line = source_line(record.position(), next_line);
        next_line = line + 1;

        match parse_row(&record, &header_map, x_col, y_col) {
            Ok(listing) => {
                if max_price.is_some_and(|max| listing.price > max) {
                    rows_filtered += 1;
                    continue;
                }
                listings.push(listing);
            }
            Err(message) => row_errors.push(RowError {
                line,
                id: get_optional(&record, &header_map, "id").map(str::to_string),
                message,
            }),
        }
    }

    if !row_errors.is_empty() {
        warn!(skipped = row_errors.len(), rows_read, "skipped invalid listing rows");
    }
    if rows_filtered > 0 {
        debug!(rows_filtered, "listings above max price filtered out");
    }
    if listings.is_empty() {
        return Err(AppError::input("No valid listing rows remain after validation/filtering."));
    }

    Ok(IngestedListings {
        listings,
        row_errors,
        rows_read,
        rows_filtered,
    })
}

/// First physical line of a record; quoted fields may span several lines.
fn source_line(position: Option<&csv::Position>, fallback: usize) -> usize {
    position.map_or(fallback, |p| p.line() as usize)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // UTF-8 exports from spreadsheet tools may carry a BOM on the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_variable_columns_exist(explanatory: &[Variable], header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    for var in explanatory {
        let present = match var {
            Variable::EntireHomeShare => header_map.contains_key("room_type"),
            Variable::Bathrooms => header_map.contains_key("bathrooms") || header_map.contains_key("bathrooms_text"),
            other => header_map.contains_key(other.column()),
        };
        if !present {
            return Err(AppError::input(format!(
                "Explanatory variable `{}` requires a `{}` column in the listings CSV.",
                var.label(),
                var.column()
            )));
        }
    }
    Ok(())
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    x_col: &str,
    y_col: &str,
) -> Result<Listing, String> {
    let id = get_required(record, header_map, "id")?.to_string();

    let raw_price = get_required(record, header_map, "price")?;
    let price = parse_price(raw_price).ok_or_else(|| format!("Invalid price '{raw_price}'."))?;
    if price <= 0.0 {
        return Err(format!("Non-positive price {price}."));
    }

    let x = parse_opt_f64(Some(get_required(record, header_map, x_col)?))
        .ok_or_else(|| format!("Invalid `{x_col}` value."))?;
    let y = parse_opt_f64(Some(get_required(record, header_map, y_col)?))
        .ok_or_else(|| format!("Invalid `{y_col}` value."))?;

    let bathrooms = parse_opt_f64(get_optional(record, header_map, "bathrooms"))
        .or_else(|| get_optional(record, header_map, "bathrooms_text").and_then(parse_bathrooms_text));

    Ok(Listing {
        id,
        price,
        accommodates: parse_opt_f64(get_optional(record, header_map, "accommodates")),
        bedrooms: parse_opt_f64(get_optional(record, header_map, "bedrooms")),
        bathrooms,
        beds: parse_opt_f64(get_optional(record, header_map, "beds")),
        review_scores_rating: parse_opt_f64(get_optional(record, header_map, "review_scores_rating")),
        number_of_reviews: parse_opt_f64(get_optional(record, header_map, "number_of_reviews")),
        room_type: get_optional(record, header_map, "room_type").map(str::to_string),
        location: Point::new(x, y),
    })
}

/// Parse prices like `$1,200.00`, `£85`, `85`, ` 1 200 `.
pub fn parse_price(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `"1.5 baths"`, `"1 shared bath"`, `"Half-bath"`.
fn parse_bathrooms_text(s: &str) -> Option<f64> {
    let lower = s.to_ascii_lowercase();
    if lower.contains("half") {
        return Some(0.5);
    }
    lower.split_whitespace().next().and_then(|tok| tok.parse::<f64>().ok())
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let s = s?;
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

/// Price and composition summary of ingested listings.
pub fn listing_stats(listings: &[Listing]) -> Option<ListingStats> {
    let prices: Vec<f64> = listings.iter().map(|l| l.price).collect();
    let five = crate::math::five_number(&prices)?;
    let typed: Vec<bool> = listings
        .iter()
        .filter_map(|l| l.room_type.as_deref().map(crate::domain::is_entire_home))
        .collect();
    let entire_home_share = if typed.is_empty() {
        f64::NAN
    } else {
        typed.iter().filter(|&&e| e).count() as f64 / typed.len() as f64
    };
    Some(ListingStats {
        n_listings: listings.len(),
        price_min: five.min,
        price_max: five.max,
        price_median: five.median,
        entire_home_share,
    })
}
