//! Inline SVG charts for popups.
//!
//! Charts are emitted as self-contained SVG markup embedded directly in the
//! popup HTML, so the map artifact stays a single file with no image assets.

use std::fmt::Write as FmtWrite;

use polars::prelude::*;

use crate::error::FlowMapError;
use crate::table::fmt_any;

pub const CHART_WIDTH: u32 = 540;
pub const CHART_HEIGHT: u32 = 380;

// Categorical palette, cycled per category / hue level.
const PALETTE: [&str; 10] = [
    "#4c72b0", "#dd8452", "#55a868", "#c44e52", "#8172b3", "#937860", "#da8bc3", "#8c8c8c",
    "#ccb974", "#64b5cd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlotKind {
    #[default]
    Bar,
    Scatter,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Estimator {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl Estimator {
    fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Estimator::Sum => values.iter().sum(),
            Estimator::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Estimator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Estimator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Estimator::Count => values.len() as f64,
        }
    }
}

/// Popup chart configuration. A chart is only attempted when both `x` and
/// `y` are set.
#[derive(Debug, Clone, Default)]
pub struct PlotSpec {
    pub x: Option<String>,
    pub y: Option<String>,
    pub kind: PlotKind,
    pub hue: Option<String>,
    pub estimator: Estimator,
    pub ci: Option<f64>,
}

impl PlotSpec {
    pub fn is_configured(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }
}

/// One aggregated bar / point.
struct Group {
    cat_idx: usize,
    hue_idx: usize,
    value: f64,
    ci_margin: Option<f64>,
}

/// Render a chart over `df` per `spec`. Returns SVG markup.
///
/// Incompatible data (non-numeric value column, nothing to plot) surfaces as
/// [`FlowMapError::ChartRender`]; the popup builder swallows it.
pub fn render_chart(df: &DataFrame, spec: &PlotSpec) -> Result<String, FlowMapError> {
    let x_name = spec
        .x
        .as_deref()
        .ok_or_else(|| FlowMapError::ChartRender("plot x not configured".into()))?;
    let y_name = spec
        .y
        .as_deref()
        .ok_or_else(|| FlowMapError::ChartRender("plot y not configured".into()))?;

    match spec.kind {
        PlotKind::Scatter => render_scatter(df, spec, x_name, y_name),
        PlotKind::Bar | PlotKind::Point => render_categorical(df, spec, x_name, y_name),
    }
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, FlowMapError> {
    let series = df
        .column(name)
        .map_err(|e| FlowMapError::ChartRender(e.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|e| FlowMapError::ChartRender(e.to_string()))?;
    let ca = series
        .f64()
        .map_err(|e| FlowMapError::ChartRender(e.to_string()))?
        .clone();
    if ca.len() > 0 && ca.null_count() == ca.len() {
        return Err(FlowMapError::ChartRender(format!(
            "column '{name}' has no numeric values"
        )));
    }
    Ok(ca)
}

fn display_column(df: &DataFrame, name: &str) -> Result<Vec<String>, FlowMapError> {
    let series = df
        .column(name)
        .map_err(|e| FlowMapError::ChartRender(e.to_string()))?
        .as_materialized_series()
        .clone();
    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        out.push(fmt_any(&series.get(i)?));
    }
    Ok(out)
}

fn level_index(levels: &mut Vec<String>, value: &str) -> usize {
    match levels.iter().position(|l| l == value) {
        Some(idx) => idx,
        None => {
            levels.push(value.to_string());
            levels.len() - 1
        }
    }
}

fn z_for_level(level: f64) -> f64 {
    match level.round() as i64 {
        90 => 1.645,
        99 => 2.576,
        _ => 1.960,
    }
}

fn sample_sd(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn fmt_tick(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v.abs() >= 1000.0 || v.fract() == 0.0 {
        format!("{}", v.round() as i64)
    } else {
        format!("{v:.2}")
    }
}

fn render_categorical(
    df: &DataFrame,
    spec: &PlotSpec,
    x_name: &str,
    y_name: &str,
) -> Result<String, FlowMapError> {
    let x_vals = display_column(df, x_name)?;
    let y_vals = numeric_column(df, y_name)?;
    let hue_vals = match &spec.hue {
        Some(h) => Some(display_column(df, h)?),
        None => None,
    };

    let mut categories: Vec<String> = Vec::new();
    let mut hue_levels: Vec<String> = Vec::new();
    let mut buckets: Vec<(usize, usize, Vec<f64>)> = Vec::new();

    for i in 0..df.height() {
        let y = match y_vals.get(i) {
            Some(v) => v,
            None => continue,
        };
        let cat_idx = level_index(&mut categories, &x_vals[i]);
        let hue_idx = match &hue_vals {
            Some(h) => level_index(&mut hue_levels, &h[i]),
            None => 0,
        };
        match buckets
            .iter_mut()
            .find(|(c, h, _)| *c == cat_idx && *h == hue_idx)
        {
            Some((_, _, values)) => values.push(y),
            None => buckets.push((cat_idx, hue_idx, vec![y])),
        }
    }

    if categories.is_empty() {
        return Err(FlowMapError::ChartRender("nothing to plot".into()));
    }

    let groups: Vec<Group> = buckets
        .into_iter()
        .map(|(cat_idx, hue_idx, values)| {
            let value = spec.estimator.apply(&values);
            let ci_margin = match spec.ci {
                Some(level) if values.len() > 1 => {
                    Some(z_for_level(level) * sample_sd(&values) / (values.len() as f64).sqrt())
                }
                _ => None,
            };
            Group {
                cat_idx,
                hue_idx,
                value,
                ci_margin,
            }
        })
        .collect();

    // ── Layout ──────────────────────────────────────────────────────────
    let n_hue = hue_levels.len().max(1);
    let margin_left = 60.0;
    let margin_right = if hue_vals.is_some() { 120.0 } else { 20.0 };
    let margin_top = 20.0;
    let margin_bottom = 90.0;
    let plot_w = CHART_WIDTH as f64 - margin_left - margin_right;
    let plot_h = CHART_HEIGHT as f64 - margin_top - margin_bottom;

    let mut y_min: f64 = 0.0;
    let mut y_max = f64::NEG_INFINITY;
    for g in &groups {
        let m = g.ci_margin.unwrap_or(0.0);
        y_min = y_min.min(g.value - m);
        y_max = y_max.max(g.value + m);
    }
    if y_max <= y_min {
        y_max = y_min + 1.0;
    }
    let y_px = |v: f64| margin_top + plot_h * (1.0 - (v - y_min) / (y_max - y_min));

    let band_w = plot_w / categories.len() as f64;
    let bar_w = band_w * 0.8 / n_hue as f64;

    let mut svg = svg_open();
    draw_axes(&mut svg, margin_left, margin_top, plot_w, plot_h);

    // y ticks
    for t in 0..=4 {
        let v = y_min + (y_max - y_min) * t as f64 / 4.0;
        let y = y_px(v);
        let _ = write!(
            svg,
            r##"<line x1="{x0}" y1="{y:.1}" x2="{x1}" y2="{y:.1}" stroke="#ddd"/><text x="{tx}" y="{ty:.1}" class="tick" text-anchor="end">{label}</text>"##,
            x0 = margin_left,
            x1 = margin_left + plot_w,
            tx = margin_left - 6.0,
            ty = y + 4.0,
            label = fmt_tick(v),
        );
    }

    for g in &groups {
        let x = margin_left
            + band_w * g.cat_idx as f64
            + band_w * 0.1
            + bar_w * g.hue_idx as f64;
        let color = if hue_vals.is_some() {
            PALETTE[g.hue_idx % PALETTE.len()]
        } else {
            PALETTE[g.cat_idx % PALETTE.len()]
        };
        match spec.kind {
            PlotKind::Point => {
                let cx = x + bar_w / 2.0;
                let _ = write!(
                    svg,
                    r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="5" fill="{color}"/>"##,
                    cy = y_px(g.value),
                );
            }
            _ => {
                let top = y_px(g.value.max(0.0));
                let bottom = y_px(g.value.min(0.0));
                let _ = write!(
                    svg,
                    r##"<rect x="{x:.1}" y="{top:.1}" width="{bar_w:.1}" height="{h:.1}" fill="{color}"/>"##,
                    h = (bottom - top).abs(),
                );
            }
        }
        if let Some(m) = g.ci_margin {
            let cx = x + bar_w / 2.0;
            let (lo, hi) = (y_px(g.value - m), y_px(g.value + m));
            let _ = write!(
                svg,
                r##"<line x1="{cx:.1}" y1="{lo:.1}" x2="{cx:.1}" y2="{hi:.1}" stroke="#2b2b2b" stroke-width="1.5"/>"##,
            );
        }
    }

    // rotated x labels at band centers
    for (idx, cat) in categories.iter().enumerate() {
        let cx = margin_left + band_w * (idx as f64 + 0.5);
        let cy = margin_top + plot_h + 14.0;
        let _ = write!(
            svg,
            r##"<text x="{cx:.1}" y="{cy:.1}" class="tick" text-anchor="end" transform="rotate(-45 {cx:.1} {cy:.1})">{label}</text>"##,
            label = escape_xml(cat),
        );
    }

    if hue_vals.is_some() {
        draw_legend(&mut svg, &hue_levels, margin_left + plot_w + 16.0, margin_top);
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn render_scatter(
    df: &DataFrame,
    spec: &PlotSpec,
    x_name: &str,
    y_name: &str,
) -> Result<String, FlowMapError> {
    let x_vals = numeric_column(df, x_name)?;
    let y_vals = numeric_column(df, y_name)?;
    let hue_vals = match &spec.hue {
        Some(h) => Some(display_column(df, h)?),
        None => None,
    };

    let mut hue_levels: Vec<String> = Vec::new();
    let mut points: Vec<(f64, f64, usize)> = Vec::new();
    for i in 0..df.height() {
        if let (Some(x), Some(y)) = (x_vals.get(i), y_vals.get(i)) {
            let hue_idx = match &hue_vals {
                Some(h) => level_index(&mut hue_levels, &h[i]),
                None => 0,
            };
            points.push((x, y, hue_idx));
        }
    }
    if points.is_empty() {
        return Err(FlowMapError::ChartRender("nothing to plot".into()));
    }

    let margin_left = 60.0;
    let margin_right = if hue_vals.is_some() { 120.0 } else { 20.0 };
    let margin_top = 20.0;
    let margin_bottom = 60.0;
    let plot_w = CHART_WIDTH as f64 - margin_left - margin_right;
    let plot_h = CHART_HEIGHT as f64 - margin_top - margin_bottom;

    let pad = |lo: f64, hi: f64| {
        let span = if hi > lo { hi - lo } else { 1.0 };
        (lo - span * 0.05, hi + span * 0.05)
    };
    let (x_min, x_max) = pad(
        points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
        points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
    );
    let (y_min, y_max) = pad(
        points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
        points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
    );

    let x_px = |v: f64| margin_left + plot_w * (v - x_min) / (x_max - x_min);
    let y_px = |v: f64| margin_top + plot_h * (1.0 - (v - y_min) / (y_max - y_min));

    let mut svg = svg_open();
    draw_axes(&mut svg, margin_left, margin_top, plot_w, plot_h);

    for t in 0..=4 {
        let xv = x_min + (x_max - x_min) * t as f64 / 4.0;
        let yv = y_min + (y_max - y_min) * t as f64 / 4.0;
        let _ = write!(
            svg,
            r##"<text x="{tx:.1}" y="{txy:.1}" class="tick" text-anchor="middle">{xl}</text><text x="{ty:.1}" y="{tyy:.1}" class="tick" text-anchor="end">{yl}</text>"##,
            tx = x_px(xv),
            txy = margin_top + plot_h + 16.0,
            ty = margin_left - 6.0,
            tyy = y_px(yv) + 4.0,
            xl = fmt_tick(xv),
            yl = fmt_tick(yv),
        );
    }

    for (x, y, hue_idx) in &points {
        let _ = write!(
            svg,
            r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="4" fill="{color}" fill-opacity="0.8"/>"##,
            cx = x_px(*x),
            cy = y_px(*y),
            color = PALETTE[hue_idx % PALETTE.len()],
        );
    }

    if hue_vals.is_some() {
        draw_legend(&mut svg, &hue_levels, margin_left + plot_w + 16.0, margin_top);
    }

    svg.push_str("</svg>");
    Ok(svg)
}

// ── SVG helpers ─────────────────────────────────────────────────────────────

fn svg_open() -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{CHART_WIDTH}" height="{CHART_HEIGHT}" viewBox="0 0 {CHART_WIDTH} {CHART_HEIGHT}"><style>.tick {{ font-family: sans-serif; font-size: 11px; fill: #444; }}</style>"##
    )
}

fn draw_axes(svg: &mut String, left: f64, top: f64, plot_w: f64, plot_h: f64) {
    let _ = write!(
        svg,
        r##"<line x1="{left}" y1="{top}" x2="{left}" y2="{bottom}" stroke="#2b2b2b"/><line x1="{left}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="#2b2b2b"/>"##,
        bottom = top + plot_h,
        right = left + plot_w,
    );
}

fn draw_legend(svg: &mut String, levels: &[String], x: f64, y: f64) {
    for (i, level) in levels.iter().enumerate() {
        let ly = y + 18.0 * i as f64;
        let _ = write!(
            svg,
            r##"<rect x="{x:.1}" y="{ly:.1}" width="12" height="12" fill="{color}"/><text x="{tx:.1}" y="{ty:.1}" class="tick">{label}</text>"##,
            color = PALETTE[i % PALETTE.len()],
            tx = x + 16.0,
            ty = ly + 10.0,
            label = escape_xml(level),
        );
    }
}

pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
