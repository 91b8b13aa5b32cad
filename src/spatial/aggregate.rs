//! Per-area aggregation of joined listings.

use tracing::debug;

use crate::domain::{Area, AreaRecord, DroppedArea, Listing, Variable};

/// Aggregation output: eligible areas plus the ones that were dropped.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub records: Vec<AreaRecord>,
    pub dropped: Vec<DroppedArea>,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    n_listings: usize,
    price_sum: f64,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

/// Average the selected attributes of the listings in each area.
///
/// Missing attribute values are skipped (they don't count as zero). An area is
/// dropped when it has fewer than `min_listings` listings, or when one of the
/// selected attributes has no values at all inside it.
pub fn aggregate_by_area(
    listings: &[Listing],
    assignment: &[Option<usize>],
    areas: &[Area],
    explanatory: &[Variable],
    min_listings: usize,
) -> Aggregation {
    let k = explanatory.len();
    let mut acc = vec![
        Accumulator {
            sums: vec![0.0; k],
            counts: vec![0; k],
            ..Accumulator::default()
        };
        areas.len()
    ];

    for (listing, area_idx) in listings.iter().zip(assignment.iter()) {
        let Some(area_idx) = *area_idx else {
            continue;
        };
        let Some(slot) = acc.get_mut(area_idx) else {
            continue;
        };
        slot.n_listings += 1;
        slot.price_sum += listing.price;
        for (j, &var) in explanatory.iter().enumerate() {
            if let Some(v) = listing.value(var).filter(|v| v.is_finite()) {
                slot.sums[j] += v;
                slot.counts[j] += 1;
            }
        }
    }

    let mut records = Vec::new();
    let mut dropped = Vec::new();

    for (idx, (area, slot)) in areas.iter().zip(acc.into_iter()).enumerate() {
        if slot.n_listings == 0 {
            dropped.push(DroppedArea {
                id: area.id.clone(),
                reason: "no listings".to_string(),
            });
            continue;
        }
        if slot.n_listings < min_listings {
            dropped.push(DroppedArea {
                id: area.id.clone(),
                reason: format!("only {} listing(s) (< {min_listings})", slot.n_listings),
            });
            continue;
        }
        if let Some(j) = slot.counts.iter().position(|&c| c == 0) {
            dropped.push(DroppedArea {
                id: area.id.clone(),
                reason: format!("no values for `{}`", explanatory[j].column()),
            });
            continue;
        }

        let means = slot
            .sums
            .iter()
            .zip(slot.counts.iter())
            .map(|(s, &c)| s / c as f64)
            .collect();

        records.push(AreaRecord {
            area_index: idx,
            id: area.id.clone(),
            name: area.name.clone(),
            centroid: (area.centroid.x(), area.centroid.y()),
            n_listings: slot.n_listings,
            mean_price: slot.price_sum / slot.n_listings as f64,
            means,
        });
    }

    debug!(kept = records.len(), dropped = dropped.len(), "aggregated listings by area");
    Aggregation { records, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiPolygon, Point, polygon};

    fn area(id: &str) -> Area {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        Area::from_geometry(id.to_string(), None, MultiPolygon::new(vec![poly])).unwrap()
    }

    fn listing(price: f64, bedrooms: Option<f64>, room_type: &str) -> Listing {
        Listing {
            id: format!("L{price}"),
            price,
            accommodates: Some(2.0),
            bedrooms,
            bathrooms: None,
            beds: None,
            review_scores_rating: None,
            number_of_reviews: None,
            room_type: Some(room_type.to_string()),
            location: Point::new(0.5, 0.5),
        }
    }

    #[test]
    fn means_skip_missing_values() {
        let areas = vec![area("a"), area("b")];
        let listings = vec![
            listing(100.0, Some(1.0), "Entire home/apt"),
            listing(200.0, None, "Private room"),
            listing(300.0, Some(3.0), "Private room"),
        ];
        let assignment = vec![Some(0), Some(0), Some(0)];
        let vars = [Variable::Bedrooms, Variable::EntireHomeShare];
        let agg = aggregate_by_area(&listings, &assignment, &areas, &vars, 1);

        assert_eq!(agg.records.len(), 1);
        let rec = &agg.records[0];
        assert_eq!(rec.n_listings, 3);
        assert!((rec.mean_price - 200.0).abs() < 1e-12);
        assert!((rec.means[0] - 2.0).abs() < 1e-12);
        assert!((rec.means[1] - 1.0 / 3.0).abs() < 1e-12);

        assert_eq!(agg.dropped.len(), 1);
        assert_eq!(agg.dropped[0].id, "b");
    }

    #[test]
    fn thin_areas_are_dropped() {
        let areas = vec![area("a")];
        let listings = vec![listing(100.0, Some(1.0), "Private room")];
        let agg = aggregate_by_area(&listings, &[Some(0)], &areas, &[Variable::Bedrooms], 2);
        assert!(agg.records.is_empty());
        assert!(agg.dropped[0].reason.contains("only 1"));
    }
}
