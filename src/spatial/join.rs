//! Point-in-polygon spatial join.
//!
//! A uniform grid over the polygon bounding boxes narrows each point down to a
//! handful of candidate areas; the exact `Intersects` test then runs only on
//! those. Points exactly on a shared boundary go to the lowest-index area,
//! which keeps the join deterministic.

use geo::{Intersects, Point, Rect};
use rayon::prelude::*;

use crate::domain::Area;

/// Join output: the area index for each point (`None` = outside every polygon).
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub assignment: Vec<Option<usize>>,
    pub matched: usize,
    pub unmatched: usize,
}

/// Grid index over area bounding boxes.
struct GridIndex {
    min_x: f64,
    min_y: f64,
    cell: f64,
    nx: usize,
    ny: usize,
    cells: Vec<Vec<usize>>,
}

impl GridIndex {
    fn build(areas: &[Area]) -> Option<Self> {
        let extent = areas.iter().map(|a| a.bbox).reduce(|a, b| {
            Rect::new(
                (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
            )
        })?;

        let width = extent.width().max(f64::EPSILON);
        let height = extent.height().max(f64::EPSILON);
        // Roughly one area per cell on average.
        let target = (areas.len() as f64).sqrt().ceil().max(1.0);
        let cell = (width.max(height) / target).max(f64::EPSILON);
        let nx = ((width / cell).ceil() as usize).max(1);
        let ny = ((height / cell).ceil() as usize).max(1);

        let mut index = Self {
            min_x: extent.min().x,
            min_y: extent.min().y,
            cell,
            nx,
            ny,
            cells: vec![Vec::new(); nx * ny],
        };

        for (idx, area) in areas.iter().enumerate() {
            let (x0, y0) = index.cell_of(area.bbox.min().x, area.bbox.min().y);
            let (x1, y1) = index.cell_of(area.bbox.max().x, area.bbox.max().y);
            for cy in y0..=y1 {
                for cx in x0..=x1 {
                    index.cells[cy * nx + cx].push(idx);
                }
            }
        }

        Some(index)
    }

    fn cell_of(&self, x: f64, y: f64) -> (usize, usize) {
        let cx = ((x - self.min_x) / self.cell).floor().max(0.0) as usize;
        let cy = ((y - self.min_y) / self.cell).floor().max(0.0) as usize;
        (cx.min(self.nx - 1), cy.min(self.ny - 1))
    }

    fn candidates(&self, p: Point<f64>) -> &[usize] {
        let x = p.x();
        let y = p.y();
        if !(x.is_finite() && y.is_finite()) {
            return &[];
        }
        let max_x = self.min_x + self.cell * self.nx as f64;
        let max_y = self.min_y + self.cell * self.ny as f64;
        if x < self.min_x || y < self.min_y || x > max_x || y > max_y {
            return &[];
        }
        let (cx, cy) = self.cell_of(x, y);
        &self.cells[cy * self.nx + cx]
    }
}

/// Assign each point to the area containing it.
///
/// `points` must already be in the areas' CRS.
pub fn join_points_to_areas(points: &[Point<f64>], areas: &[Area]) -> JoinResult {
    let Some(index) = GridIndex::build(areas) else {
        return JoinResult {
            assignment: vec![None; points.len()],
            matched: 0,
            unmatched: points.len(),
        };
    };

    let assignment: Vec<Option<usize>> = points
        .par_iter()
        .map(|p| {
            // Candidate lists are built in ascending area order.
            index.candidates(*p).iter().copied().find(|&idx| {
                let area = &areas[idx];
                bbox_contains(&area.bbox, *p) && area.geometry.intersects(p)
            })
        })
        .collect();

    let matched = assignment.iter().filter(|a| a.is_some()).count();
    JoinResult {
        unmatched: assignment.len() - matched,
        matched,
        assignment,
    }
}

fn bbox_contains(rect: &Rect<f64>, p: Point<f64>) -> bool {
    let (x, y) = (p.x(), p.y());
    x >= rect.min().x && x <= rect.max().x && y >= rect.min().y && y <= rect.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiPolygon, polygon};

    fn square(id: &str, x: f64, y: f64) -> Area {
        let poly = polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ];
        Area::from_geometry(id.to_string(), None, MultiPolygon::new(vec![poly])).unwrap()
    }

    #[test]
    fn points_land_in_their_squares() {
        let areas = vec![square("a", 0.0, 0.0), square("b", 1.0, 0.0), square("c", 0.0, 1.0)];
        let points = vec![
            Point::new(0.5, 0.5),
            Point::new(1.5, 0.2),
            Point::new(0.3, 1.9),
            Point::new(5.0, 5.0),
        ];
        let joined = join_points_to_areas(&points, &areas);
        assert_eq!(joined.assignment, vec![Some(0), Some(1), Some(2), None]);
        assert_eq!(joined.matched, 3);
        assert_eq!(joined.unmatched, 1);
    }

    #[test]
    fn shared_boundary_goes_to_lowest_index() {
        let areas = vec![square("a", 0.0, 0.0), square("b", 1.0, 0.0)];
        let joined = join_points_to_areas(&[Point::new(1.0, 0.5)], &areas);
        assert_eq!(joined.assignment, vec![Some(0)]);
    }

    #[test]
    fn no_areas_means_nothing_matches() {
        let joined = join_points_to_areas(&[Point::new(0.0, 0.0)], &[]);
        assert_eq!(joined.unmatched, 1);
    }
}
