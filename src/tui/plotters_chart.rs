//! Plotters-powered area map widget for Ratatui.
//!
//! Plotters output is drawn into the Ratatui buffer with
//! `plotters-ratatui-backend`. All series and bounds are computed outside the
//! render call, so `render()` only draws.

use plotters::prelude::*;
use plotters_ratatui_backend::widget_fn;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::Widget,
};

/// Area centroids colored by class.
pub struct AreaMapChart<'a> {
    /// Centroid coordinates (CRS units).
    pub points: &'a [(f64, f64)],
    /// Class index per point, indexing `palette`.
    pub classes: &'a [usize],
    pub palette: &'a [RGBColor],
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub x_label: &'a str,
    pub y_label: &'a str,
}

impl<'a> Widget for AreaMapChart<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Plotters can fail to lay out very small areas.
        if area.width < 20 || area.height < 8 {
            buf.set_string(
                area.x,
                area.y,
                "Map area too small (resize terminal).",
                Style::default().fg(Color::Yellow),
            );
            return;
        }

        let [x0, x1] = self.x_bounds;
        let [y0, y1] = self.y_bounds;
        if !(x0.is_finite() && x1.is_finite() && y0.is_finite() && y1.is_finite()) || x1 <= x0 || y1 <= y0 {
            return;
        }

        let widget = widget_fn(move |root| {
            let mut chart = ChartBuilder::on(&root)
                .margin(1)
                .set_label_area_size(LabelAreaPosition::Left, 8)
                .set_label_area_size(LabelAreaPosition::Bottom, 3)
                .build_cartesian_2d(x0..x1, y0..y1)?;

            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_y_mesh()
                .x_desc(self.x_label)
                .y_desc(self.y_label)
                .x_labels(4)
                .y_labels(4)
                .x_label_formatter(&|v| format!("{v:.0}"))
                .y_label_formatter(&|v| format!("{v:.0}"))
                .label_style(("sans-serif", 10).into_font().color(&WHITE))
                .axis_style(&WHITE)
                .draw()?;

            // `Circle` radii come out in canvas units with this backend, so a
            // colored `Pixel` is used per area.
            let fallback = WHITE;
            chart.draw_series(self.points.iter().zip(self.classes).map(|(&(x, y), &c)| {
                let color = self.palette.get(c).copied().unwrap_or(fallback);
                Pixel::new((x, y), color)
            }))?;

            Ok(())
        });

        widget.render(area, buf);
    }
}

/// Light-to-dark ramp for quintile classes.
pub static QUINTILE_RAMP: [RGBColor; 5] = [
    RGBColor(69, 117, 180),
    RGBColor(145, 191, 219),
    RGBColor(255, 255, 191),
    RGBColor(252, 141, 89),
    RGBColor(215, 48, 39),
];

/// Categorical palette for clusters.
pub static CATEGORY_PALETTE: [RGBColor; 8] = [
    RGBColor(0, 255, 255),
    RGBColor(255, 0, 255),
    RGBColor(255, 255, 0),
    RGBColor(0, 255, 0),
    RGBColor(255, 128, 0),
    RGBColor(128, 128, 255),
    RGBColor(255, 0, 0),
    RGBColor(255, 255, 255),
];

/// HH, LH, LL, HL, ns.
pub static LISA_PALETTE: [RGBColor; 5] = [
    RGBColor(215, 25, 28),
    RGBColor(171, 217, 233),
    RGBColor(44, 123, 182),
    RGBColor(253, 174, 97),
    RGBColor(110, 110, 110),
];

/// Ratatui color matching a palette entry, for legends.
pub fn to_tui_color(c: RGBColor) -> Color {
    Color::Rgb(c.0, c.1, c.2)
}
