//! Map document: accumulates markers and polylines and emits one
//! self-contained HTML page.
//!
//! All rendering is done client-side by Leaflet loaded from its CDN; this
//! module serializes element data into the inline script and writes the
//! HTML shell. Popup content is embedded via `<iframe srcdoc>` so arbitrary
//! table/chart markup stays isolated from the page.

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::FlowMapError;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
const TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
const ATTRIBUTION: &str =
    r#"&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors"#;

const POPUP_MAX_WIDTH: u32 = 2650;
const ICON_SIZE: u32 = 40;

struct MarkerElement {
    lat: f64,
    long: f64,
    html: String,
    width: u32,
    height: u32,
    icon_url: Option<String>,
}

struct LineElement {
    a: (f64, f64),
    b: (f64, f64),
    color: String,
    opacity: f64,
    html: String,
    width: u32,
    height: u32,
}

/// Accumulator for one map artifact.
pub struct MapDocument {
    center: (f64, f64),
    zoom: u32,
    markers: Vec<MarkerElement>,
    lines: Vec<LineElement>,
}

impl Default for MapDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MapDocument {
    /// World view centered on `[0, 0]`, zoom 2, OpenStreetMap tiles.
    pub fn new() -> Self {
        Self {
            center: (0.0, 0.0),
            zoom: 2,
            markers: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn add_marker(
        &mut self,
        lat: f64,
        long: f64,
        html: String,
        width: u32,
        height: u32,
        icon_url: Option<String>,
    ) {
        self.markers.push(MarkerElement {
            lat,
            long,
            html,
            width,
            height,
            icon_url,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_line(
        &mut self,
        a: (f64, f64),
        b: (f64, f64),
        color: String,
        opacity: f64,
        html: String,
        width: u32,
        height: u32,
    ) {
        self.lines.push(LineElement {
            a,
            b,
            color,
            opacity,
            html,
            width,
            height,
        });
    }

    /// Render the full self-contained HTML page.
    pub fn render(&self) -> String {
        let mut script = String::new();
        let _ = write!(
            script,
            "var map = L.map('map').setView([{lat}, {long}], {zoom});\n\
             L.tileLayer('{TILE_URL}', {{maxZoom: 19, attribution: \"{ATTRIBUTION}\"}}).addTo(map);\n",
            lat = self.center.0,
            long = self.center.1,
            zoom = self.zoom,
        );

        for (i, m) in self.markers.iter().enumerate() {
            if let Some(url) = &m.icon_url {
                let _ = write!(
                    script,
                    "var icon_{i} = L.icon({{iconUrl: \"{url}\", iconSize: [{ICON_SIZE}, {ICON_SIZE}], popupAnchor: [0, -20]}});\n\
                     var marker_{i} = L.marker([{lat}, {long}], {{icon: icon_{i}}}).addTo(map);\n",
                    url = escape_js(url),
                    lat = m.lat,
                    long = m.long,
                );
            } else {
                let _ = write!(
                    script,
                    "var marker_{i} = L.marker([{lat}, {long}]).addTo(map);\n",
                    lat = m.lat,
                    long = m.long,
                );
            }
            let _ = write!(
                script,
                "marker_{i}.bindPopup(\"{popup}\", {{maxWidth: {POPUP_MAX_WIDTH}}});\n",
                popup = escape_js(&popup_iframe(&m.html, m.width, m.height)),
            );
        }

        for (i, l) in self.lines.iter().enumerate() {
            let _ = write!(
                script,
                "var line_{i} = L.polyline([[{a0}, {a1}], [{b0}, {b1}]], {{color: \"{color}\", opacity: {opacity}, weight: 3}}).addTo(map);\n\
                 line_{i}.bindPopup(\"{popup}\", {{maxWidth: {POPUP_MAX_WIDTH}}});\n",
                a0 = l.a.0,
                a1 = l.a.1,
                b0 = l.b.0,
                b1 = l.b.1,
                color = escape_js(&l.color),
                opacity = l.opacity,
                popup = escape_js(&popup_iframe(&l.html, l.width, l.height)),
            );
        }

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="{LEAFLET_CSS}">
<script src="{LEAFLET_JS}"></script>
<style>html, body, #map {{ height: 100%; width: 100%; margin: 0; padding: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
{script}</script>
</body>
</html>
"#
        )
    }

    /// Write the rendered page to `path`.
    ///
    /// A filename carrying neither a `.html` nor a `.ejs` extension gets
    /// `.html` appended. Returns the path actually written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, FlowMapError> {
        let path = path.as_ref();
        let path = match path.extension().and_then(|e| e.to_str()) {
            Some("html") | Some("ejs") => path.to_path_buf(),
            _ => {
                let mut name = path.as_os_str().to_os_string();
                name.push(".html");
                PathBuf::from(name)
            }
        };
        fs::write(&path, self.render())?;
        info!(
            path = %path.display(),
            markers = self.markers.len(),
            lines = self.lines.len(),
            "saved map"
        );
        Ok(path)
    }
}

/// Wrap popup content in a sized iframe via `srcdoc`.
fn popup_iframe(html: &str, width: u32, height: u32) -> String {
    format!(
        r#"<iframe srcdoc="{}" width="{width}" height="{height}" style="border:none;"></iframe>"#,
        escape_attr(html),
    )
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_js(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> MapDocument {
        let mut doc = MapDocument::new();
        doc.add_marker(1.0, 2.0, "<p>hi</p>".into(), 1000, 130, None);
        doc.add_marker(
            3.0,
            4.0,
            "<p>logo</p>".into(),
            1000,
            200,
            Some("http://x/l.png".into()),
        );
        doc.add_line((1.0, 2.0), (3.0, 4.0), "green".into(), 1.0, "<p>ln</p>".into(), 1000, 130);
        doc
    }

    #[test]
    fn renders_all_elements() {
        let html = sample_doc().render();
        assert_eq!(html.matches("L.marker(").count(), 2);
        assert_eq!(html.matches("L.polyline(").count(), 1);
        assert_eq!(html.matches("L.icon(").count(), 1);
        assert!(html.contains("setView([0, 0], 2)"));
    }

    #[test]
    fn popup_html_is_attribute_escaped() {
        let html = sample_doc().render();
        assert!(html.contains("&lt;p&gt;hi&lt;/p&gt;"));
        assert!(!html.contains("srcdoc=\\\"<p>hi</p>"));
    }

    #[test]
    fn save_appends_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        let doc = sample_doc();

        let written = doc.save(dir.path().join("mymap")).unwrap();
        assert_eq!(written.extension().unwrap(), "html");
        assert!(written.exists());

        let kept = doc.save(dir.path().join("server.ejs")).unwrap();
        assert_eq!(kept.extension().unwrap(), "ejs");
    }
}
