use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::info;

use crate::aggregation::Centroid;
use crate::chart::PlotSpec;
use crate::error::FlowMapError;
use crate::lines::{assemble_lines, ColorRule, FixedColor};
use crate::map::MapDocument;
use crate::markers::{self, MarkerOptions};
use crate::popup::PopupConfig;
use crate::table::FlowTable;

/// Popup iframe widths in pixels, marker and line popups adjustable
/// separately.
#[derive(Debug, Clone, Copy)]
pub struct PopupWidth {
    pub marker: u32,
    pub line: u32,
}

impl Default for PopupWidth {
    fn default() -> Self {
        Self {
            marker: 1000,
            line: 1000,
        }
    }
}

/// The flow-visualization pipeline.
///
/// Owns the validated [`FlowTable`] plus the whole configuration surface as
/// public fields; [`FlowMap::create_map`] runs split → markers → lines and
/// stores the resulting [`MapDocument`]. All state is per instance —
/// independent pipelines never share anything.
///
/// ```no_run
/// use flowmap::FlowMap;
///
/// let mut fm = FlowMap::from_csv("flows.csv")?;
/// fm.popup_len = 5;
/// fm.aggregate("region")?;
/// fm.create_map()?;
/// fm.save_map("MyMap")?;
/// # Ok::<(), flowmap::FlowMapError>(())
/// ```
pub struct FlowMap {
    table: FlowTable,

    /// Max flow rows shown per popup.
    pub popup_len: usize,
    /// Column to sort popup flow rows by, descending.
    pub sort_var: Option<String>,
    /// Explicit column order for popup tables.
    pub popup_order: Option<Vec<String>>,
    /// Attributes shown in marker metadata popups; `None` = all paired
    /// attributes.
    pub marker_info: Option<Vec<String>>,
    /// Attempt marker logo resolution.
    pub get_marker_logos: bool,
    /// Verify logo URL reachability before using it.
    pub logo_check: bool,
    /// Pluggable line coloring strategy.
    pub line_rule: Box<dyn ColorRule>,
    pub line_opacity: f64,
    pub popup_width: PopupWidth,
    /// Popup chart configuration; charts are skipped unless both axes are
    /// set.
    pub plot: PlotSpec,

    map: Option<MapDocument>,
}

impl FlowMap {
    fn with_table(table: FlowTable) -> Self {
        Self {
            table,
            popup_len: 3,
            sort_var: None,
            popup_order: None,
            marker_info: None,
            get_marker_logos: false,
            logo_check: true,
            line_rule: Box::new(FixedColor::default()),
            line_opacity: 1.0,
            popup_width: PopupWidth::default(),
            plot: PlotSpec::default(),
            map: None,
        }
    }

    pub fn new(df: DataFrame) -> Result<Self, FlowMapError> {
        Ok(Self::with_table(FlowTable::new(df)?))
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, FlowMapError> {
        Ok(Self::with_table(FlowTable::from_csv(path)?))
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    /// Restrict the working table to rows matching `predicate`; see
    /// [`FlowTable::focus`].
    pub fn focus(&mut self, predicate: Expr) -> Result<(), FlowMapError> {
        self.table.focus(predicate)
    }

    /// Undo the most recent `focus`.
    pub fn restore(&mut self) {
        self.table.restore()
    }

    /// Collapse locations to category centroids; see [`FlowTable::aggregate`].
    pub fn aggregate(&mut self, category: &str) -> Result<HashMap<String, Centroid>, FlowMapError> {
        self.table.aggregate(category)
    }

    /// Replace the line coloring strategy.
    pub fn set_line_rule(&mut self, rule: impl ColorRule + 'static) {
        self.line_rule = Box::new(rule);
    }

    fn popup_config(&self) -> PopupConfig {
        PopupConfig {
            len: self.popup_len,
            sort_var: self.sort_var.clone(),
            order: self.popup_order.clone(),
            plot: self.plot.clone(),
        }
    }

    /// Run the full pipeline and store the resulting map document.
    ///
    /// Any previously built document is discarded first.
    pub fn create_map(&mut self) -> Result<&MapDocument, FlowMapError> {
        info!(rows = self.table.height(), "building flow map");
        self.map = None;

        let cfg = self.popup_config();
        let opts = MarkerOptions {
            info: self
                .marker_info
                .clone()
                .unwrap_or_else(|| self.table.paired_attributes()),
            get_logos: self.get_marker_logos,
            logo_check: self.logo_check,
        };

        let (intra, inter) = self.table.split()?;
        let intra_pass = markers::intra_markers(&intra, &cfg, &opts)?;
        let inter_pass = markers::inter_markers(&inter, &cfg, &opts)?;

        let mut doc = MapDocument::new();
        for m in markers::merge_markers(intra_pass, inter_pass) {
            doc.add_marker(
                m.lat,
                m.long,
                m.html,
                self.popup_width.marker,
                m.ipix,
                m.logo,
            );
        }
        for l in assemble_lines(&inter, &cfg, self.line_rule.as_ref(), self.line_opacity)? {
            doc.add_line(
                l.a,
                l.b,
                l.color,
                l.opacity,
                l.html,
                self.popup_width.line,
                l.ipix,
            );
        }

        info!(
            markers = doc.marker_count(),
            lines = doc.line_count(),
            "flow map assembled"
        );
        Ok(&*self.map.insert(doc))
    }

    /// Save the map artifact, building it first if needed; see
    /// [`MapDocument::save`] for extension handling.
    pub fn save_map(&mut self, path: impl AsRef<Path>) -> Result<PathBuf, FlowMapError> {
        if self.map.is_none() {
            self.create_map()?;
        }
        self.map
            .as_ref()
            .ok_or_else(|| FlowMapError::General("map document missing after build".into()))?
            .save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_loops_yield_one_marker_no_lines() {
        let df = df!(
            "src_lat" => [1.0, 1.0], "src_long" => [1.0, 1.0],
            "dst_lat" => [1.0, 1.0], "dst_long" => [1.0, 1.0],
            "src_org" => ["a", "a"], "dst_org" => ["a", "a"],
        )
        .unwrap();
        let mut fm = FlowMap::new(df).unwrap();
        let doc = fm.create_map().unwrap();
        assert_eq!(doc.marker_count(), 1);
        assert_eq!(doc.line_count(), 0);
    }

    #[test]
    fn reciprocal_flows_yield_one_line_two_markers() {
        let df = df!(
            "src_lat" => [1.0, 2.0], "src_long" => [1.0, 2.0],
            "dst_lat" => [2.0, 1.0], "dst_long" => [2.0, 1.0],
            "src_org" => ["a", "b"], "dst_org" => ["b", "a"],
        )
        .unwrap();
        let mut fm = FlowMap::new(df).unwrap();
        let doc = fm.create_map().unwrap();
        assert_eq!(doc.marker_count(), 2);
        assert_eq!(doc.line_count(), 1);
    }

    #[test]
    fn custom_line_rule_colors_rendered_output() {
        let df = df!(
            "src_lat" => [1.0], "src_long" => [1.0],
            "dst_lat" => [2.0], "dst_long" => [2.0],
            "bytes" => [100i64],
        )
        .unwrap();
        let mut fm = FlowMap::new(df).unwrap();
        fm.set_line_rule(|flows: &DataFrame| {
            if flows.height() > 0 {
                "red".to_string()
            } else {
                "green".to_string()
            }
        });
        let doc = fm.create_map().unwrap();
        let html = doc.render();
        assert!(html.contains(r#"color: \"red\""#) || html.contains(r#"color: "red""#));
    }

    #[test]
    fn aggregate_then_map_collapses_markers() {
        // Two distinct source cities in the same region end up as one
        // marker once aggregated.
        let df = df!(
            "src_lat" => [1.0, 3.0], "src_long" => [1.0, 3.0],
            "dst_lat" => [10.0, 10.0], "dst_long" => [10.0, 10.0],
            "src_region" => ["west", "west"], "dst_region" => ["east", "east"],
        )
        .unwrap();
        let mut fm = FlowMap::new(df).unwrap();
        fm.aggregate("region").unwrap();
        let doc = fm.create_map().unwrap();
        assert_eq!(doc.marker_count(), 2);
        assert_eq!(doc.line_count(), 1);
    }

    #[test]
    fn save_map_builds_and_writes() {
        let df = df!(
            "src_lat" => [1.0], "src_long" => [1.0],
            "dst_lat" => [2.0], "dst_long" => [2.0],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut fm = FlowMap::new(df).unwrap();
        let written = fm.save_map(dir.path().join("flows")).unwrap();
        assert!(written.ends_with("flows.html"));
        let html = std::fs::read_to_string(written).unwrap();
        assert!(html.contains("L.polyline("));
        assert_eq!(html.matches("L.marker(").count(), 2);
    }
}
