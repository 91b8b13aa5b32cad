//! ASCII plotting for terminal output.
//!
//! Fixed-size character grids, deterministic for the same input:
//! - centroid maps: one glyph per area, shaded by quintile or labelled by category
//! - Moran scatterplot: `o` points, `-` slope line, `|`/`-` axes through zero

use geo::Point;

use super::{quantile_classes, LayerValues, MapLayer, LISA_CODES};
use crate::app::pipeline::RunOutput;
use crate::stats::LisaResult;

/// Quintile shading, light to dark.
pub const SHADES: [char; 5] = ['.', ':', '+', '*', '#'];
const LISA_GLYPHS: [char; 5] = ['H', 'h', 'L', 'l', '.'];
const CLUSTER_GLYPHS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Centroid map for one layer of a run, with a legend.
pub fn render_layer_map(run: &RunOutput, layer: MapLayer, width: usize, height: usize) -> String {
    let centroids = &run.prepared.centroids;
    let (glyphs, legend) = match layer.values(run) {
        LayerValues::Continuous(values) => {
            let (class, breaks) = quantile_classes(&values, SHADES.len());
            let glyphs: Vec<char> = class.iter().map(|&c| SHADES[c.min(SHADES.len() - 1)]).collect();
            (glyphs, shade_legend(&values, &breaks))
        }
        LayerValues::Categorical(idx, labels) => {
            let lisa = layer == MapLayer::Lisa;
            let glyph = |c: usize| {
                if lisa {
                    LISA_GLYPHS[c.min(LISA_GLYPHS.len() - 1)]
                } else {
                    CLUSTER_GLYPHS[c % CLUSTER_GLYPHS.len()] as char
                }
            };
            let glyphs: Vec<char> = idx.iter().map(|&c| glyph(c)).collect();
            let legend = labels
                .iter()
                .enumerate()
                .map(|(c, label)| {
                    let n = idx.iter().filter(|&&v| v == c).count();
                    format!("{}={label} ({n})", glyph(c))
                })
                .collect::<Vec<_>>()
                .join("  ");
            (glyphs, legend)
        }
    };

    let mut out = String::new();
    out.push_str(&format!("Map: {} ({} areas)\n", layer.title(run), centroids.len()));
    out.push_str(&render_points(centroids, &glyphs, width, height));
    out.push_str(&format!("Legend: {legend}\n"));
    out
}

/// LISA cluster map without the model stages.
pub fn render_lisa_map(centroids: &[Point<f64>], lisa: &LisaResult, width: usize, height: usize) -> String {
    let glyphs: Vec<char> = (0..lisa.local_i.len())
        .map(|i| {
            let code = lisa.label(i);
            let c = LISA_CODES.iter().position(|l| *l == code).unwrap_or(4);
            LISA_GLYPHS[c]
        })
        .collect();
    let legend = LISA_CODES
        .iter()
        .zip(LISA_GLYPHS)
        .map(|(code, g)| format!("{g}={code}"))
        .collect::<Vec<_>>()
        .join("  ");
    let mut out = format!("Map: LISA clusters (alpha={})\n", lisa.alpha);
    out.push_str(&render_points(centroids, &glyphs, width, height));
    out.push_str(&format!("Legend: {legend}\n"));
    out
}

/// Place one glyph per point on a grid spanning the points' bounding box.
pub fn render_points(points: &[Point<f64>], glyphs: &[char], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let mut grid = vec![vec![' '; width]; height];

    let xs: Vec<f64> = points.iter().map(|p| p.x()).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y()).collect();
    if let (Some((x_min, x_max)), Some((y_min, y_max))) = (range(&xs), range(&ys)) {
        let (x_min, x_max) = pad_range(x_min, x_max, 0.02);
        let (y_min, y_max) = pad_range(y_min, y_max, 0.02);
        for (p, &ch) in points.iter().zip(glyphs) {
            let x = map_x(p.x(), x_min, x_max, width);
            let y = map_y(p.y(), y_min, y_max, height);
            grid[y][x] = ch;
        }
    }

    let mut out = String::new();
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }
    out
}

/// Moran scatterplot of `(z, Wz)` pairs with the slope-`I` line through the origin.
pub fn render_moran_scatter(pairs: &[(f64, f64)], moran_i: f64, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let zs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let lags: Vec<f64> = pairs.iter().map(|p| p.1).collect();

    // Symmetric around zero so the quadrants read at a glance.
    let x_abs = range(&zs).map(|(a, b)| a.abs().max(b.abs())).unwrap_or(1.0).max(1e-9);
    let y_abs = range(&lags).map(|(a, b)| a.abs().max(b.abs())).unwrap_or(1.0).max(1e-9);
    let (x_min, x_max) = pad_range(-x_abs, x_abs, 0.05);
    let (y_min, y_max) = pad_range(-y_abs, y_abs, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let x0 = map_x(0.0, x_min, x_max, width);
    let y0 = map_y(0.0, y_min, y_max, height);
    for row in grid.iter_mut() {
        row[x0] = '|';
    }
    for cell in grid[y0].iter_mut() {
        *cell = '-';
    }
    grid[y0][x0] = '+';

    let line_start = (x_min, moran_i * x_min);
    let line_end = (x_max, moran_i * x_max);
    draw_line(
        &mut grid,
        map_x(line_start.0, x_min, x_max, width),
        map_y(line_start.1, y_min, y_max, height),
        map_x(line_end.0, x_min, x_max, width),
        map_y(line_end.1, y_min, y_max, height),
        '/',
    );

    for &(z, l) in pairs {
        let x = map_x(z, x_min, x_max, width);
        let y = map_y(l, y_min, y_max, height);
        grid[y][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Moran scatterplot: I={moran_i:.4} | z=[{x_min:.2}, {x_max:.2}] Wz=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }
    out
}

fn shade_legend(values: &[f64], breaks: &[f64]) -> String {
    let Some((lo, hi)) = range(values) else {
        return "no finite values".to_string();
    };
    let mut edges = vec![lo];
    edges.extend_from_slice(breaks);
    edges.push(hi);
    edges
        .windows(2)
        .zip(SHADES.iter())
        .map(|(w, ch)| format!("{ch}={:.3}..{:.3}", w[0], w[1]))
        .collect::<Vec<_>>()
        .join("  ")
}

fn range(values: &[f64]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-9);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // top row is max
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Integer line drawing (Bresenham). Only writes blank cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            let cell = &mut grid[y0 as usize][x0 as usize];
            if *cell == ' ' {
                *cell = ch;
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_land_in_corners() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)];
        let s = render_points(&pts, &['a', 'b'], 20, 6);
        let rows: Vec<&str> = s.lines().collect();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].ends_with('b'));
        assert!(rows[5].starts_with('a'));
    }

    #[test]
    fn scatter_has_axes_and_points() {
        let pairs = vec![(-1.0, -0.8), (1.0, 0.9), (0.5, 0.4)];
        let s = render_moran_scatter(&pairs, 0.85, 30, 11);
        assert!(s.starts_with("Moran scatterplot: I=0.8500"));
        let points: usize = s.lines().skip(1).map(|l| l.matches('o').count()).sum();
        assert_eq!(points, 3);
        assert!(s.contains('+'));
        assert!(s.contains('/'));
    }

    #[test]
    fn legend_spans_all_shades() {
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let (_, breaks) = quantile_classes(&values, 5);
        let legend = shade_legend(&values, &breaks);
        assert!(legend.starts_with(".=0.000.."));
        assert!(legend.contains("#="));
    }

    #[test]
    fn layer_map_for_demo_run() {
        let config = crate::domain::AnalysisConfig {
            demo_grid: 6,
            demo_listings_per_area: 12,
            permutations: 49,
            clusters: 3,
            cluster_k_max: 0,
            kmeans_restarts: 2,
            ..Default::default()
        };
        let run = crate::app::pipeline::run_analysis(&config).unwrap();
        for layer in MapLayer::all(run.local.gwr.k) {
            let s = render_layer_map(&run, layer, 40, 12);
            assert!(s.starts_with("Map: "));
            assert!(s.contains("Legend: "));
        }
    }
}
