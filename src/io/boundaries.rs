//! Polygon shapefile ingest.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::PolygonRing;
use tracing::{debug, info, warn};

use crate::domain::{Area, Crs, CrsArg};
use crate::error::AppError;

/// Fields tried, in order, when no id field is configured.
pub const ID_FIELD_CANDIDATES: &[&str] = &[
    "GSS_CODE", "MSOA21CD", "MSOA11CD", "LSOA21CD", "LSOA11CD", "WD23CD", "WD22CD", "LAD22CD", "LAD21CD", "CODE",
    "ID", "NAME",
];
/// Fields tried, in order, for a human-readable name.
pub const NAME_FIELD_CANDIDATES: &[&str] = &["NAME", "MSOA21NM", "MSOA11NM", "LSOA21NM", "LSOA11NM", "WD23NM", "LAD22NM"];

#[derive(Debug, Clone)]
pub struct BoundaryLayer {
    pub areas: Vec<Area>,
    pub crs: Crs,
    /// Where the CRS came from (`.prj`, flag, default).
    pub crs_source: String,
    pub id_field: String,
    pub name_field: Option<String>,
    /// Ids of records skipped for empty geometry.
    pub skipped: Vec<String>,
}

/// Read a polygon shapefile (`.shp` + `.dbf`) into areas.
///
/// `fallback` is the CRS assumed when `crs_arg` is `auto` and the `.prj` is
/// missing or unrecognised; callers pass the listings' CRS.
pub fn load_boundaries(
    path: &Path,
    crs_arg: CrsArg,
    fallback: Crs,
    id_field: Option<&str>,
    name_field: Option<&str>,
) -> Result<BoundaryLayer, AppError> {
    if !path.exists() {
        return Err(AppError::input(format!("Boundary file '{}' does not exist.", path.display())));
    }
    let shapes = shapefile::read_as::<_, shapefile::Polygon, Record>(path)
        .map_err(|e| AppError::input(format!("Failed to read shapefile '{}': {e}", path.display())))?;
    if shapes.is_empty() {
        return Err(AppError::data(format!("Shapefile '{}' has no polygons.", path.display())));
    }

    let first = &shapes[0].1;
    let id_field = match id_field {
        Some(f) => resolve_field(first, &[f])
            .ok_or_else(|| AppError::input(format!("Id field `{f}` not found in '{}'.", path.display())))?,
        None => resolve_field(first, ID_FIELD_CANDIDATES).ok_or_else(|| {
            AppError::input(format!(
                "Could not auto-detect an id field in '{}'; pass --id-field (tried {}).",
                path.display(),
                ID_FIELD_CANDIDATES.join(", ")
            ))
        })?,
    };
    let name_field = match name_field {
        Some(f) => Some(
            resolve_field(first, &[f])
                .ok_or_else(|| AppError::input(format!("Name field `{f}` not found in '{}'.", path.display())))?,
        ),
        None => resolve_field(first, NAME_FIELD_CANDIDATES).filter(|f| *f != id_field),
    };
    debug!(id_field = %id_field, name_field = ?name_field, "boundary fields resolved");

    let mut areas = Vec::with_capacity(shapes.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();
    for (idx, (polygon, record)) in shapes.iter().enumerate() {
        let id = record
            .get(&id_field)
            .and_then(field_to_string)
            .ok_or_else(|| AppError::input(format!("Record {idx} has an empty `{id_field}` value.")))?;
        if !seen.insert(id.clone()) {
            return Err(AppError::input(format!("Duplicate area id `{id}` in field `{id_field}`.")));
        }
        let name = name_field.as_ref().and_then(|f| record.get(f)).and_then(field_to_string);
        let geometry = rings_to_multipolygon(polygon.rings());
        match Area::from_geometry(id.clone(), name, geometry) {
            Some(area) => areas.push(area),
            None => {
                warn!(id = %id, "skipping area with empty geometry");
                skipped.push(id);
            }
        }
    }
    if areas.is_empty() {
        return Err(AppError::data("All boundary geometries are empty."));
    }

    let prj = fs::read_to_string(path.with_extension("prj")).ok();
    let (crs, crs_source) = resolve_crs(crs_arg, prj.as_deref(), fallback);
    info!(areas = areas.len(), crs = crs.display_name(), source = %crs_source, "boundaries loaded");

    Ok(BoundaryLayer {
        areas,
        crs,
        crs_source,
        id_field,
        name_field,
        skipped,
    })
}

/// First candidate present on the record, matched case-insensitively against
/// the common spellings.
fn resolve_field(record: &Record, candidates: &[&str]) -> Option<String> {
    for cand in candidates {
        for variant in [cand.to_string(), cand.to_ascii_uppercase(), cand.to_ascii_lowercase()] {
            if record.get(&variant).is_some() {
                return Some(variant);
            }
        }
    }
    None
}

/// Render a DBF value as a trimmed id/name string.
pub fn field_to_string(value: &FieldValue) -> Option<String> {
    let s = match value {
        FieldValue::Character(Some(s)) => s.trim().to_string(),
        FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(v)) | FieldValue::Double(v) | FieldValue::Currency(v) => format_number(*v),
        FieldValue::Float(Some(v)) => format_number(f64::from(*v)),
        FieldValue::Integer(v) => v.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn to_line_string(points: &[shapefile::Point]) -> LineString<f64> {
    LineString::new(points.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
}

/// Assemble shapefile rings into polygons: every inner ring joins the first
/// outer ring containing it, or the outer ring read just before it when none
/// does.
pub fn rings_to_multipolygon(rings: &[PolygonRing<shapefile::Point>]) -> MultiPolygon<f64> {
    let mut outers: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    // Each inner ring with the index of the last outer ring read before it.
    let mut pending_inner: Vec<(LineString<f64>, Option<usize>)> = Vec::new();

    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => outers.push((to_line_string(points), Vec::new())),
            PolygonRing::Inner(points) => pending_inner.push((to_line_string(points), outers.len().checked_sub(1))),
        }
    }

    for (inner, preceding) in pending_inner {
        let Some(first) = inner.0.first().map(|c| Point::from(*c)) else {
            continue;
        };
        let host = outers
            .iter()
            .position(|(outer, _)| Polygon::new(outer.clone(), Vec::new()).contains(&first))
            .or(preceding);
        match host {
            Some(i) => outers[i].1.push(inner),
            // A lone inner ring is treated as an outer boundary.
            None => outers.push((inner, Vec::new())),
        }
    }

    MultiPolygon::new(outers.into_iter().map(|(ext, holes)| Polygon::new(ext, holes)).collect())
}

/// Decide the boundary CRS from the flag and an optional `.prj` body.
pub fn resolve_crs(arg: CrsArg, prj: Option<&str>, fallback: Crs) -> (Crs, String) {
    match arg {
        CrsArg::Wgs84 => return (Crs::Wgs84, "flag".to_string()),
        CrsArg::Bng => return (Crs::Bng, "flag".to_string()),
        CrsArg::Auto => {}
    }
    let Some(prj) = prj else {
        return (fallback, "listing CRS (no .prj)".to_string());
    };
    let upper = prj.to_ascii_uppercase();
    if upper.contains("BRITISH_NATIONAL_GRID") || upper.contains("OSGB") || upper.contains("27700") {
        return (Crs::Bng, ".prj".to_string());
    }
    if !upper.contains("PROJCS") && (upper.contains("WGS_1984") || upper.contains("WGS84") || upper.contains("WGS 84")) {
        return (Crs::Wgs84, ".prj".to_string());
    }
    warn!(fallback = fallback.display_name(), "unrecognised .prj; using the listing CRS");
    (fallback, "listing CRS (unrecognised .prj)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area as _;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<shapefile::Point> {
        vec![
            shapefile::Point::new(x0, y0),
            shapefile::Point::new(x0, y0 + size),
            shapefile::Point::new(x0 + size, y0 + size),
            shapefile::Point::new(x0 + size, y0),
            shapefile::Point::new(x0, y0),
        ]
    }

    #[test]
    fn holes_attach_to_their_containing_outer() {
        let rings = vec![
            PolygonRing::Outer(square(0.0, 0.0, 10.0)),
            PolygonRing::Outer(square(20.0, 0.0, 10.0)),
            PolygonRing::Inner(square(22.0, 2.0, 2.0)),
        ];
        let mp = rings_to_multipolygon(&rings);
        assert_eq!(mp.0.len(), 2);
        assert!(mp.0[0].interiors().is_empty());
        assert_eq!(mp.0[1].interiors().len(), 1);
        assert!((mp.unsigned_area() - (100.0 + 100.0 - 4.0)).abs() < 1e-9);
    }

    #[test]
    fn stray_hole_joins_the_outer_ring_read_before_it() {
        // The inner ring lies outside both outers; it follows the first one.
        let rings = vec![
            PolygonRing::Outer(square(0.0, 0.0, 10.0)),
            PolygonRing::Inner(square(50.0, 50.0, 2.0)),
            PolygonRing::Outer(square(20.0, 0.0, 10.0)),
        ];
        let mp = rings_to_multipolygon(&rings);
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!(mp.0[1].interiors().is_empty());
    }

    #[test]
    fn prj_sniffing() {
        let bng = r#"PROJCS["British_National_Grid",GEOGCS["GCS_OSGB_1936"]]"#;
        let wgs = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]]"#;
        assert_eq!(resolve_crs(CrsArg::Auto, Some(bng), Crs::Wgs84).0, Crs::Bng);
        assert_eq!(resolve_crs(CrsArg::Auto, Some(wgs), Crs::Bng).0, Crs::Wgs84);
        assert_eq!(resolve_crs(CrsArg::Wgs84, Some(bng), Crs::Bng).0, Crs::Wgs84);
        assert_eq!(resolve_crs(CrsArg::Bng, None, Crs::Wgs84).0, Crs::Bng);
    }

    #[test]
    fn missing_or_unknown_prj_follows_listing_crs() {
        assert_eq!(resolve_crs(CrsArg::Auto, None, Crs::Wgs84).0, Crs::Wgs84);
        assert_eq!(resolve_crs(CrsArg::Auto, None, Crs::Bng).0, Crs::Bng);
        let odd = r#"PROJCS["Lambert_Conformal_Conic"]"#;
        let (crs, source) = resolve_crs(CrsArg::Auto, Some(odd), Crs::Wgs84);
        assert_eq!(crs, Crs::Wgs84);
        assert!(source.contains("unrecognised"));
    }

    #[test]
    fn field_values_render_as_ids() {
        assert_eq!(field_to_string(&FieldValue::Character(Some(" E02000001 ".into()))).as_deref(), Some("E02000001"));
        assert_eq!(field_to_string(&FieldValue::Numeric(Some(42.0))).as_deref(), Some("42"));
        assert_eq!(field_to_string(&FieldValue::Character(None)), None);
    }

    fn write_wgs84_grid(path: &Path, side: usize) {
        use shapefile::dbase::{FieldName, TableWriterBuilder};

        let table = TableWriterBuilder::new().add_character_field(FieldName::try_from("CODE").unwrap(), 16);
        let mut writer = shapefile::Writer::from_path(path, table).unwrap();
        let step = 0.01;
        for row in 0..side {
            for col in 0..side {
                let ring = square(-0.2 + col as f64 * step, 51.45 + row as f64 * step, step);
                let polygon = shapefile::Polygon::new(PolygonRing::Outer(ring));
                let mut record = Record::default();
                record.insert("CODE".to_string(), FieldValue::Character(Some(format!("A{row}{col}"))));
                writer.write_shape_and_record(&polygon, &record).unwrap();
            }
        }
    }

    #[test]
    fn geographic_shapefile_without_prj_uses_listing_crs() {
        let dir = std::env::temp_dir().join(format!("lspat-boundaries-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let shp = dir.join("grid.shp");
        write_wgs84_grid(&shp, 5);
        assert!(!shp.with_extension("prj").exists());

        let layer = load_boundaries(&shp, CrsArg::Auto, Crs::Wgs84, None, None).unwrap();
        assert_eq!(layer.crs, Crs::Wgs84);
        assert_eq!(layer.areas.len(), 25);
        assert_eq!(layer.id_field, "CODE");
        assert!(layer.crs_source.contains("no .prj"));
        let inside = Point::new(-0.195, 51.455);
        assert!(layer.areas.iter().any(|a| a.geometry.contains(&inside)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_input_error() {
        let err = load_boundaries(Path::new("/nonexistent/areas.shp"), CrsArg::Auto, Crs::Wgs84, None, None).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INPUT);
    }
}
