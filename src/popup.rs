//! Popup content: an optional chart plus an HTML table over a bounded
//! number of flow rows.

use std::fmt::Write as FmtWrite;

use polars::prelude::*;
use tracing::debug;

use crate::chart::{self, PlotSpec};
use crate::error::FlowMapError;
use crate::table::fmt_any;

/// Pixel height per visible flow row.
const ROW_PX: u32 = 75;
/// Popup height floor.
const MIN_PX: u32 = 130;
/// Extra height reserved whenever the chart branch is taken.
const CHART_PX: u32 = 400;

#[derive(Debug, Clone)]
pub struct PopupConfig {
    /// Max flow rows shown per popup.
    pub len: usize,
    /// Column to sort flow rows by, descending. Data popups only.
    pub sort_var: Option<String>,
    /// Explicit column order for the popup table. Data popups only.
    pub order: Option<Vec<String>>,
    pub plot: PlotSpec,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            len: 3,
            sort_var: None,
            order: None,
            plot: PlotSpec::default(),
        }
    }
}

/// Build popup HTML and its display height.
///
/// `data` popups (flow rows) get the chart, sorting and column reordering;
/// metadata popups (`data = false`) only truncate. The chart branch is taken
/// when plot axes are configured and more than one row exists — the height
/// is reserved even when rendering fails, in which case the chart silently
/// degrades to nothing.
pub fn build_popup(
    df: &DataFrame,
    cfg: &PopupConfig,
    data: bool,
) -> Result<(String, u32), FlowMapError> {
    let mut height = (ROW_PX * df.height().min(cfg.len) as u32).max(MIN_PX);

    let mut chart_svg = String::new();
    if data && cfg.plot.is_configured() && df.height() > 1 {
        match chart::render_chart(df, &cfg.plot) {
            Ok(svg) => chart_svg = svg,
            Err(e) => debug!(error = %e, "popup chart degraded to empty"),
        }
        height += CHART_PX;
    }

    let mut view = df.clone();
    if data {
        if let Some(sort_var) = &cfg.sort_var {
            view = view
                .lazy()
                .sort(
                    [sort_var.as_str()],
                    SortMultipleOptions::default().with_order_descending(true),
                )
                .collect()?;
        }
    }
    if view.height() > cfg.len {
        view = view.head(Some(cfg.len));
    }
    if data {
        if let Some(order) = &cfg.order {
            view = view
                .lazy()
                .select(order.iter().map(|c| col(c.as_str())).collect::<Vec<_>>())
                .collect()?;
        }
    }

    let table = render_table(&view)?;
    Ok((format!("{chart_svg}{table}"), height))
}

/// Render rows as an HTML table with centered cells and a leading 0-based
/// index column. Cell values are written as-is: logo columns legitimately
/// carry `<img>` markup.
fn render_table(df: &DataFrame) -> Result<String, FlowMapError> {
    let names: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let columns: Vec<Series> = names
        .iter()
        .map(|n| df.column(n).map(|c| c.as_materialized_series().clone()))
        .collect::<Result<_, _>>()?;

    let mut html = String::from(r#"<table border="5" class="dataframe">"#);
    html.push_str(r#"<thead align="center"><tr style="text-align: center;"><th></th>"#);
    for name in &names {
        let _ = write!(html, "<th>{name}</th>");
    }
    html.push_str("</tr></thead><tbody>");

    for i in 0..df.height() {
        let _ = write!(html, "<tr><th>{i}</th>");
        for series in &columns {
            let _ = write!(html, r#"<td align="center">{}</td>"#, fmt_any(&series.get(i)?));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::PlotKind;

    fn flows(n: usize) -> DataFrame {
        let bytes: Vec<i64> = (0..n as i64).map(|i| (i + 1) * 10).collect();
        let apps: Vec<String> = (0..n).map(|i| format!("app{i}")).collect();
        df!("app" => apps, "bytes" => bytes).unwrap()
    }

    #[test]
    fn height_grows_with_rows_up_to_limit() {
        let cfg = PopupConfig::default();
        let (_, h1) = build_popup(&flows(1), &cfg, true).unwrap();
        let (_, h2) = build_popup(&flows(2), &cfg, true).unwrap();
        let (_, h3) = build_popup(&flows(3), &cfg, true).unwrap();
        let (_, h9) = build_popup(&flows(9), &cfg, true).unwrap();
        assert!(h1 <= h2 && h2 <= h3);
        assert_eq!(h3, h9); // capped at popup len
        assert_eq!(h1, 130); // floor
        assert_eq!(h3, 225);
    }

    #[test]
    fn rows_truncate_to_popup_len() {
        let cfg = PopupConfig {
            len: 2,
            ..Default::default()
        };
        let (html, _) = build_popup(&flows(5), &cfg, true).unwrap();
        assert_eq!(html.matches("<tr><th>").count(), 2);
    }

    #[test]
    fn sort_applies_before_truncation_in_data_popups() {
        let cfg = PopupConfig {
            len: 1,
            sort_var: Some("bytes".into()),
            ..Default::default()
        };
        let (html, _) = build_popup(&flows(4), &cfg, true).unwrap();
        // Largest bytes value survives the cut.
        assert!(html.contains(r#"<td align="center">40</td>"#));
        assert!(!html.contains(r#"<td align="center">10</td>"#));
    }

    #[test]
    fn order_rearranges_columns_in_data_popups() {
        let cfg = PopupConfig {
            order: Some(vec!["bytes".into(), "app".into()]),
            ..Default::default()
        };
        let (html, _) = build_popup(&flows(2), &cfg, true).unwrap();
        assert!(html.contains("<th>bytes</th><th>app</th>"));
        // First data cell of the first row is now the bytes value.
        assert!(html.contains(r#"<tr><th>0</th><td align="center">10</td>"#));
    }

    #[test]
    fn metadata_popups_ignore_sort_and_order() {
        let cfg = PopupConfig {
            len: 1,
            sort_var: Some("bytes".into()),
            order: Some(vec!["bytes".into()]),
            ..Default::default()
        };
        let (html, _) = build_popup(&flows(4), &cfg, false).unwrap();
        // First row wins unsorted, and the app column is still present.
        assert!(html.contains(r#"<td align="center">10</td>"#));
        assert!(html.contains("<th>app</th>"));
    }

    #[test]
    fn chart_adds_fixed_height() {
        let cfg = PopupConfig {
            plot: PlotSpec {
                x: Some("app".into()),
                y: Some("bytes".into()),
                kind: PlotKind::Bar,
                ..Default::default()
            },
            ..Default::default()
        };
        let (html, h) = build_popup(&flows(3), &cfg, true).unwrap();
        assert!(html.contains("<svg"));
        assert_eq!(h, 225 + 400);

        // Single row never gets a chart.
        let (html1, h1) = build_popup(&flows(1), &cfg, true).unwrap();
        assert!(!html1.contains("<svg"));
        assert_eq!(h1, 130);
    }

    #[test]
    fn failed_chart_still_reserves_height() {
        let df = df!(
            "app" => ["a", "b"],
            "bytes" => ["not", "numeric"],
        )
        .unwrap();
        let cfg = PopupConfig {
            plot: PlotSpec {
                x: Some("app".into()),
                y: Some("bytes".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (html, h) = build_popup(&df, &cfg, true).unwrap();
        assert!(!html.contains("<svg"));
        assert_eq!(h, 150 + 400);
    }
}
