//! Marker logo resolution.
//!
//! Logo cells carry `<img src="...">` markup (so they render inside popup
//! tables); the marker icon wants the bare URL. Reachability failures
//! degrade to "no logo", never to a pipeline error.

use std::collections::HashSet;

use polars::prelude::*;
use tracing::debug;

use crate::error::FlowMapError;

/// Pull the URL out of an `<img src="...">` cell. A cell without the
/// wrapper is treated as a bare URL.
pub(crate) fn extract_logo_url(cell: &str) -> Option<String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Some(start) = cell.find("src=\"") {
        let rest = &cell[start + 5..];
        let end = rest.find('"')?;
        return Some(rest[..end].to_string());
    }
    Some(cell.to_string())
}

fn probe(url: &str) -> Result<(), FlowMapError> {
    let resp = reqwest::blocking::get(url)
        .map_err(|e| FlowMapError::LogoUnreachable(format!("{url}: {e}")))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(FlowMapError::LogoUnreachable(format!(
            "{url}: status {}",
            resp.status()
        )))
    }
}

/// Resolve one representative logo from the distinct values of `column`.
///
/// With `check` on, each candidate URL is probed with a blocking request and
/// the first reachable one wins; probe failures are swallowed. With `check`
/// off the first extracted URL wins unverified. `None` when nothing
/// resolves. A missing logo column is a configuration error and propagates.
pub(crate) fn resolve_logo(
    df: &DataFrame,
    column: &str,
    check: bool,
) -> Result<Option<String>, FlowMapError> {
    let cells = df.column(column)?.str()?.clone();

    let mut seen = HashSet::new();
    for i in 0..cells.len() {
        let Some(cell) = cells.get(i) else { continue };
        if !seen.insert(cell.to_string()) {
            continue;
        }
        let Some(url) = extract_logo_url(cell) else {
            continue;
        };
        if !check {
            return Ok(Some(url));
        }
        match probe(&url) {
            Ok(()) => return Ok(Some(url)),
            Err(e) => debug!(error = %e, "logo probe failed, trying next"),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_url_from_img_markup() {
        let cell = r#"<img src="http://example.com/as/7.png" height="50" width="50">"#;
        assert_eq!(
            extract_logo_url(cell).unwrap(),
            "http://example.com/as/7.png"
        );
    }

    #[test]
    fn bare_url_passes_through() {
        assert_eq!(
            extract_logo_url("http://example.com/x.png").unwrap(),
            "http://example.com/x.png"
        );
        assert_eq!(extract_logo_url("  "), None);
    }

    #[test]
    fn unchecked_resolution_takes_first_distinct() {
        let df = df!(
            "src_logo" => [
                r#"<img src="http://a/1.png" height="50" width="50">"#,
                r#"<img src="http://a/1.png" height="50" width="50">"#,
                r#"<img src="http://b/2.png" height="50" width="50">"#,
            ],
        )
        .unwrap();
        let logo = resolve_logo(&df, "src_logo", false).unwrap();
        assert_eq!(logo.unwrap(), "http://a/1.png");
    }

    #[test]
    fn missing_logo_column_propagates() {
        let df = df!("src_lat" => [1.0]).unwrap();
        assert!(resolve_logo(&df, "src_logo", false).is_err());
    }
}
