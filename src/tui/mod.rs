//! Ratatui-based terminal UI.
//!
//! A map viewer over one analysis run: a layer picker on the right, the
//! centroid map in the middle, and keys to refit the local stages with a
//! different kernel or number of clusters.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use plotters::style::RGBColor;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Terminal,
};

use crate::app::pipeline::{self, RunOutput};
use crate::domain::{AnalysisConfig, KernelKind};
use crate::error::AppError;
use crate::plot::{quantile_classes, LayerValues, MapLayer};

mod plotters_chart;

use plotters_chart::{to_tui_color, AreaMapChart, CATEGORY_PALETTE, LISA_PALETTE, QUINTILE_RAMP};

/// Start the TUI.
pub fn run(config: AnalysisConfig) -> Result<(), AppError> {
    config.validate()?;
    let _guard = TerminalGuard::new()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal =
        Terminal::new(backend).map_err(|e| AppError::ui(format!("Failed to initialize terminal: {e}")))?;

    let mut app = App::new(config);
    app.event_loop(&mut terminal)
}

/// Restores the terminal (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::ui(format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::ui(format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

struct App {
    config: AnalysisConfig,
    kernel: KernelKind,
    clusters: usize,
    selected_layer: usize,
    status: String,
    run: Option<RunOutput>,
}

impl App {
    fn new(config: AnalysisConfig) -> Self {
        Self {
            kernel: config.kernel,
            clusters: config.clusters,
            config,
            selected_layer: 0,
            status: "Running analysis...".to_string(),
            run: None,
        }
    }

    fn layers(&self) -> Vec<MapLayer> {
        self.run
            .as_ref()
            .map(|r| MapLayer::all(r.local.gwr.k))
            .unwrap_or_else(|| vec![MapLayer::Response])
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::ui(format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            // First frame shows the "running" status; the pipeline runs after it.
            if self.run.is_none() {
                let run = pipeline::run_analysis(&self.config)?;
                self.status = format!("{} areas analysed.", run.prepared.records.len());
                self.run = Some(run);
                needs_redraw = true;
                continue;
            }

            if !event::poll(Duration::from_millis(100)).map_err(|e| AppError::ui(format!("Event poll error: {e}")))? {
                continue;
            }

            match event::read().map_err(|e| AppError::ui(format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code) {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns `true` to quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        let n_layers = self.layers().len();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up => {
                self.selected_layer = self.selected_layer.checked_sub(1).unwrap_or(n_layers - 1);
            }
            KeyCode::Down => {
                self.selected_layer = (self.selected_layer + 1) % n_layers;
            }
            KeyCode::Char('k') => {
                self.kernel = self.kernel.next();
                self.refit_local();
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.clusters += 1;
                self.recluster();
            }
            KeyCode::Char('-') => {
                if self.clusters > 2 {
                    self.clusters -= 1;
                    self.recluster();
                }
            }
            KeyCode::Char('d') => {
                if let Some(run) = &self.run {
                    self.status = match crate::debug::write_debug_bundle(run, std::path::Path::new("debug")) {
                        Ok(path) => format!("Wrote debug bundle: {}", path.display()),
                        Err(err) => format!("Debug write failed: {err}"),
                    };
                }
            }
            _ => {}
        }
        false
    }

    /// Bandwidth search, GWR and clustering again with the current kernel.
    fn refit_local(&mut self) {
        let Some(run) = &mut self.run else { return };
        match pipeline::local_model(&run.prepared, self.kernel, self.clusters) {
            Ok(local) => {
                self.status = format!("kernel: {:?}, bandwidth {}", self.kernel, local.gwr.bandwidth);
                run.local = local;
            }
            Err(err) => self.status = format!("Refit failed: {err}"),
        }
    }

    fn recluster(&mut self) {
        let Some(run) = &mut self.run else { return };
        match pipeline::cluster_slopes(&run.prepared, &run.local.gwr, self.clusters) {
            Ok(clusters) => {
                self.status = format!("k={} silhouette={:.3}", clusters.kmeans.k, clusters.silhouette);
                self.clusters = clusters.kmeans.k;
                run.local.clusters = clusters;
            }
            Err(err) => self.status = format!("Clustering failed: {err}"),
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(frame.area());

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut lines: Vec<Line> = vec![Line::from(vec![
            Span::styled("lspat", Style::default().fg(Color::Cyan)),
            Span::raw(" - spatial analysis of listing prices"),
        ])];

        if let Some(run) = &self.run {
            let p = &run.prepared;
            lines.push(Line::from(Span::styled(
                format!(
                    "{} | areas={} | {:?} weights | Moran's I={:.3} (p={:.4})",
                    p.source.description,
                    p.records.len(),
                    p.weights.kind,
                    run.spatial.moran.i,
                    run.spatial.moran.p_norm
                ),
                Style::default().fg(Color::Gray),
            )));
            let g = &run.global;
            let l = &run.local;
            lines.push(Line::from(Span::styled(
                format!(
                    "OLS R2={:.3} | lag rho={:.3} | error lambda={:.3} | GWR {:?} bw={} R2={:.3} AICc={:.1} | k={}",
                    g.ols.r2,
                    g.lag.rho.estimate,
                    g.error.lambda.estimate,
                    l.gwr.kernel,
                    l.gwr.bandwidth,
                    l.gwr.r2,
                    l.gwr.scores.aicc,
                    l.clusters.kmeans.k
                ),
                Style::default().fg(Color::Gray),
            )));
        }

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(32)])
            .split(area);

        self.draw_map(frame, chunks[0]);

        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(9)])
            .split(chunks[1]);
        self.draw_layers(frame, side[0]);
        self.draw_legend(frame, side[1]);
    }

    fn current_layer(&self) -> MapLayer {
        let layers = self.layers();
        layers.get(self.selected_layer).copied().unwrap_or(MapLayer::Response)
    }

    fn draw_map(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let Some(run) = &self.run else {
            let block = Block::default().title("Map").borders(Borders::ALL);
            let msg = Paragraph::new("Running analysis...")
                .style(Style::default().fg(Color::Yellow))
                .block(block);
            frame.render_widget(msg, area);
            return;
        };

        let layer = self.current_layer();
        let block = Block::default().title(layer.title(run)).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let series = map_series(run, layer);
        let widget = AreaMapChart {
            points: &series.points,
            classes: &series.classes,
            palette: series.palette,
            x_bounds: series.x_bounds,
            y_bounds: series.y_bounds,
            x_label: if run.prepared.geographic { "lon" } else { "easting" },
            y_label: if run.prepared.geographic { "lat" } else { "northing" },
        };
        frame.render_widget(widget, inner);
    }

    fn draw_layers(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let items: Vec<ListItem> = match &self.run {
            Some(run) => self.layers().into_iter().map(|l| ListItem::new(l.title(run))).collect(),
            None => Vec::new(),
        };
        let list = List::new(items)
            .block(Block::default().title("Layers").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("» ");

        let mut state = ListState::default();
        state.select(Some(self.selected_layer));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_legend(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default().title("Legend").borders(Borders::ALL);
        let Some(run) = &self.run else {
            frame.render_widget(block, area);
            return;
        };
        let series = map_series(run, self.current_layer());
        let lines: Vec<Line> = series
            .legend
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let color = series.palette.get(i).copied().map(to_tui_color).unwrap_or(Color::White);
                Line::from(vec![
                    Span::styled("■ ", Style::default().fg(color).add_modifier(Modifier::BOLD)),
                    Span::raw(label.clone()),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)).block(block), area);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "↑/↓ layer  k kernel  +/- clusters  d debug  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Everything the map widget and legend need for one layer.
struct MapSeries {
    points: Vec<(f64, f64)>,
    classes: Vec<usize>,
    palette: &'static [RGBColor],
    legend: Vec<String>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

fn map_series(run: &RunOutput, layer: MapLayer) -> MapSeries {
    let points: Vec<(f64, f64)> = run.prepared.centroids.iter().map(|p| (p.x(), p.y())).collect();

    let (classes, palette, legend): (Vec<usize>, &'static [RGBColor], Vec<String>) = match layer.values(run) {
        LayerValues::Continuous(values) => {
            let (classes, breaks) = quantile_classes(&values, QUINTILE_RAMP.len());
            let legend = (0..QUINTILE_RAMP.len())
                .map(|c| match (c.checked_sub(1).and_then(|i| breaks.get(i)), breaks.get(c)) {
                    (None, Some(hi)) => format!("<= {hi:.3}"),
                    (Some(lo), Some(hi)) => format!("{lo:.3} .. {hi:.3}"),
                    (Some(lo), None) => format!("> {lo:.3}"),
                    (None, None) => "all".to_string(),
                })
                .collect();
            (classes, &QUINTILE_RAMP[..], legend)
        }
        LayerValues::Categorical(idx, labels) => {
            let palette: &'static [RGBColor] = if layer == MapLayer::Lisa { &LISA_PALETTE[..] } else { &CATEGORY_PALETTE[..] };
            let legend = labels
                .iter()
                .enumerate()
                .map(|(c, label)| format!("{label} ({})", idx.iter().filter(|&&v| v == c).count()))
                .collect();
            let idx = idx.into_iter().map(|c| c % palette.len()).collect();
            (idx, palette, legend)
        }
    };

    MapSeries {
        x_bounds: padded_bounds(points.iter().map(|p| p.0)),
        y_bounds: padded_bounds(points.iter().map(|p| p.1)),
        points,
        classes,
        palette,
        legend,
    }
}

fn padded_bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in values.filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo).abs() * 0.05).max(1e-6);
    [lo - pad, hi + pad]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AnalysisConfig {
        AnalysisConfig {
            demo_grid: 5,
            demo_listings_per_area: 10,
            permutations: 19,
            clusters: 2,
            cluster_k_max: 0,
            kmeans_restarts: 2,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn map_series_matches_area_count() {
        let run = pipeline::run_analysis(&small_config()).unwrap();
        let n = run.prepared.records.len();
        for layer in MapLayer::all(run.local.gwr.k) {
            let s = map_series(&run, layer);
            assert_eq!(s.points.len(), n);
            assert_eq!(s.classes.len(), n);
            assert!(s.classes.iter().all(|&c| c < s.palette.len()));
            assert!(s.x_bounds[0] < s.x_bounds[1]);
        }
    }

    #[test]
    fn keys_cycle_layers_and_clusters() {
        let mut app = App::new(small_config());
        app.run = Some(pipeline::run_analysis(&app.config).unwrap());
        let n_layers = app.layers().len();

        app.handle_key(KeyCode::Up);
        assert_eq!(app.selected_layer, n_layers - 1);
        app.handle_key(KeyCode::Down);
        assert_eq!(app.selected_layer, 0);

        app.handle_key(KeyCode::Char('+'));
        assert_eq!(app.clusters, 3);
        assert_eq!(app.run.as_ref().unwrap().local.clusters.kmeans.k, 3);

        app.handle_key(KeyCode::Char('k'));
        assert_eq!(app.kernel, KernelKind::Gaussian);
        assert_eq!(app.run.as_ref().unwrap().local.gwr.kernel, KernelKind::Gaussian);

        assert!(app.handle_key(KeyCode::Char('q')));
    }

    #[test]
    fn padded_bounds_handle_empty() {
        assert_eq!(padded_bounds(std::iter::empty()), [0.0, 1.0]);
        let b = padded_bounds([0.0, 10.0].into_iter());
        assert!(b[0] < 0.0 && b[1] > 10.0);
    }
}
