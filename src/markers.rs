//! Marker assembly: one marker per unique location, merged across the
//! intra and inter passes.

use std::collections::HashSet;

use polars::prelude::*;
use tracing::debug;

use crate::error::FlowMapError;
use crate::logo;
use crate::popup::{build_popup, PopupConfig};
use crate::schema::{coords, DST_PREFIX, LOGO_ATTR, SRC_PREFIX};
use crate::table::fmt_any;

/// Merged marker height cap.
const MAX_MARKER_PX: u32 = 800;

/// Intermediate per-pass descriptor: flow popup, metadata popup, logo.
#[derive(Debug, Clone)]
pub struct MarkerDescriptor {
    pub lat: f64,
    pub long: f64,
    pub html1: String,
    pub html2: String,
    pub logo: Option<String>,
    pub ipix: u32,
}

/// Final per-location marker handed to the map document.
#[derive(Debug, Clone)]
pub struct Marker {
    pub lat: f64,
    pub long: f64,
    pub html: String,
    pub logo: Option<String>,
    pub ipix: u32,
}

/// Marker assembly options, resolved by the pipeline: `info` is the explicit
/// attribute list for metadata popups (already defaulted to all paired
/// attributes when the user left it unset).
pub struct MarkerOptions {
    pub info: Vec<String>,
    pub get_logos: bool,
    pub logo_check: bool,
}

/// Distinct `(lat, long)` values of two columns, in first-seen order.
/// Exact bit equality — locations either match or they don't.
fn unique_locations(
    df: &DataFrame,
    lat_col: &str,
    long_col: &str,
) -> Result<Vec<(f64, f64)>, FlowMapError> {
    let lat = df.column(lat_col)?.f64()?.clone();
    let long = df.column(long_col)?.f64()?.clone();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for i in 0..df.height() {
        let (Some(la), Some(lo)) = (lat.get(i), long.get(i)) else {
            continue;
        };
        if seen.insert((la.to_bits(), lo.to_bits())) {
            out.push((la, lo));
        }
    }
    Ok(out)
}

fn at_location(
    df: &DataFrame,
    lat_col: &str,
    long_col: &str,
    lat: f64,
    long: f64,
) -> Result<DataFrame, FlowMapError> {
    Ok(df
        .clone()
        .lazy()
        .filter(col(lat_col).eq(lit(lat)).and(col(long_col).eq(lit(long))))
        .collect()?)
}

/// Project one role's paired attributes to bare names: `src_org` → `org`.
fn role_projection(
    df: &DataFrame,
    attrs: &[String],
    prefix: &str,
) -> Result<DataFrame, FlowMapError> {
    if attrs.is_empty() {
        return Ok(DataFrame::default());
    }
    let exprs: Vec<Expr> = attrs
        .iter()
        .map(|a| col(format!("{prefix}{a}").as_str()).alias(a.as_str()))
        .collect();
    Ok(df.clone().lazy().select(exprs).collect()?)
}

/// Drop duplicate rows, keeping first occurrences.
fn dedup_rows(df: &DataFrame) -> Result<DataFrame, FlowMapError> {
    let columns: Vec<Series> = df
        .get_columns()
        .iter()
        .map(|c| c.as_materialized_series().clone())
        .collect();

    let mut seen = HashSet::new();
    let mut keep: Vec<IdxSize> = Vec::new();
    for i in 0..df.height() {
        let mut key = String::new();
        for series in &columns {
            key.push_str(&fmt_any(&series.get(i)?));
            key.push('\u{1f}');
        }
        if seen.insert(key) {
            keep.push(i as IdxSize);
        }
    }
    Ok(df.take(&IdxCa::from_vec("".into(), keep))?)
}

/// Intra pass: one descriptor per unique source location of the intra rows,
/// with a data-driven flow popup plus a metadata popup over the deduplicated
/// union of both roles' attribute rows.
pub fn intra_markers(
    intra: &DataFrame,
    cfg: &PopupConfig,
    opts: &MarkerOptions,
) -> Result<Vec<MarkerDescriptor>, FlowMapError> {
    let mut out = Vec::new();
    for (lat, long) in unique_locations(intra, coords::SRC_LAT, coords::SRC_LONG)? {
        let rows = at_location(intra, coords::SRC_LAT, coords::SRC_LONG, lat, long)?;
        let (html1, ipix1) = build_popup(&rows, cfg, true)?;

        let logo = if opts.get_logos {
            logo::resolve_logo(&rows, &format!("{SRC_PREFIX}{LOGO_ATTR}"), opts.logo_check)?
        } else {
            None
        };

        let src_meta = role_projection(&rows, &opts.info, SRC_PREFIX)?;
        let dst_meta = role_projection(&rows, &opts.info, DST_PREFIX)?;
        let meta = dedup_rows(&src_meta.vstack(&dst_meta)?)?;
        let (html2, ipix2) = build_popup(&meta, cfg, false)?;

        out.push(MarkerDescriptor {
            lat,
            long,
            html1,
            html2,
            logo,
            ipix: ipix1 + ipix2,
        });
    }
    debug!(markers = out.len(), "intra marker pass");
    Ok(out)
}

/// Inter pass: one descriptor per location appearing in either role of the
/// inter rows. Builds the source-role metadata popup where the location acts
/// as a source and the destination-role popup where it acts as a
/// destination — both, concatenated, when it acts as both. Logo resolution
/// prefers source-role attribution.
pub fn inter_markers(
    inter: &DataFrame,
    cfg: &PopupConfig,
    opts: &MarkerOptions,
) -> Result<Vec<MarkerDescriptor>, FlowMapError> {
    let mut locations = unique_locations(inter, coords::SRC_LAT, coords::SRC_LONG)?;
    let mut seen: HashSet<(u64, u64)> = locations
        .iter()
        .map(|(la, lo)| (la.to_bits(), lo.to_bits()))
        .collect();
    for (la, lo) in unique_locations(inter, coords::DST_LAT, coords::DST_LONG)? {
        if seen.insert((la.to_bits(), lo.to_bits())) {
            locations.push((la, lo));
        }
    }

    let mut out = Vec::new();
    for (lat, long) in locations {
        let src_rows = at_location(inter, coords::SRC_LAT, coords::SRC_LONG, lat, long)?;
        let dst_rows = at_location(inter, coords::DST_LAT, coords::DST_LONG, lat, long)?;

        let mut html2 = String::new();
        let mut ipix = 0u32;
        let mut logo = None;

        if src_rows.height() > 0 {
            let meta = dedup_rows(&role_projection(&src_rows, &opts.info, SRC_PREFIX)?)?;
            let (html, px) = build_popup(&meta, cfg, false)?;
            html2.push_str(&html);
            ipix += px;
            if opts.get_logos {
                logo = logo::resolve_logo(
                    &src_rows,
                    &format!("{SRC_PREFIX}{LOGO_ATTR}"),
                    opts.logo_check,
                )?;
            }
        }
        if dst_rows.height() > 0 {
            let meta = dedup_rows(&role_projection(&dst_rows, &opts.info, DST_PREFIX)?)?;
            let (html, px) = build_popup(&meta, cfg, false)?;
            html2.push_str(&html);
            ipix += px;
            if logo.is_none() && opts.get_logos {
                logo = logo::resolve_logo(
                    &dst_rows,
                    &format!("{DST_PREFIX}{LOGO_ATTR}"),
                    opts.logo_check,
                )?;
            }
        }

        out.push(MarkerDescriptor {
            lat,
            long,
            html1: String::new(),
            html2,
            logo,
            ipix,
        });
    }
    debug!(markers = out.len(), "inter marker pass");
    Ok(out)
}

/// Union both passes' descriptors by location. Where a location appears more
/// than once, popup content concatenates in order, heights sum (capped), and
/// the first non-empty logo wins.
pub fn merge_markers(intra: Vec<MarkerDescriptor>, inter: Vec<MarkerDescriptor>) -> Vec<Marker> {
    let all: Vec<MarkerDescriptor> = intra.into_iter().chain(inter).collect();

    let mut order: Vec<(u64, u64)> = Vec::new();
    let mut seen = HashSet::new();
    for d in &all {
        let key = (d.lat.to_bits(), d.long.to_bits());
        if seen.insert(key) {
            order.push(key);
        }
    }

    let mut markers = Vec::with_capacity(order.len());
    for key in order {
        let matches: Vec<&MarkerDescriptor> = all
            .iter()
            .filter(|d| (d.lat.to_bits(), d.long.to_bits()) == key)
            .collect();

        let mut html = String::new();
        let mut ipix = 0u32;
        let mut logo = None;
        for d in &matches {
            html.push_str(&d.html1);
            html.push_str(&d.html2);
            ipix = ipix.saturating_add(d.ipix);
            if logo.is_none() {
                logo = d.logo.clone();
            }
        }

        markers.push(Marker {
            lat: matches[0].lat,
            long: matches[0].long,
            html,
            logo,
            ipix: ipix.min(MAX_MARKER_PX),
        });
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> MarkerOptions {
        MarkerOptions {
            info: vec!["org".into()],
            get_logos: false,
            logo_check: false,
        }
    }

    fn intra_frame() -> DataFrame {
        df!(
            "src_lat" => [1.0, 1.0],
            "src_long" => [1.0, 1.0],
            "dst_lat" => [1.0, 1.0],
            "dst_long" => [1.0, 1.0],
            "src_org" => ["acme", "acme"],
            "dst_org" => ["acme", "globex"],
            "bytes" => [10i64, 20],
        )
        .unwrap()
    }

    #[test]
    fn one_descriptor_per_intra_location() {
        let descriptors = intra_markers(&intra_frame(), &PopupConfig::default(), &opts()).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!((descriptors[0].lat, descriptors[0].long), (1.0, 1.0));
    }

    #[test]
    fn metadata_union_deduplicates_roles() {
        let descriptors = intra_markers(&intra_frame(), &PopupConfig::default(), &opts()).unwrap();
        // src role contributes "acme" twice, dst role "acme" and "globex":
        // the union dedups to two rows.
        let html2 = &descriptors[0].html2;
        assert_eq!(html2.matches("<tr><th>").count(), 2);
        assert!(html2.contains("globex"));
    }

    #[test]
    fn inter_location_in_both_roles_gets_both_popups() {
        // One location (1,1) is source of row 0 and destination of row 1.
        let inter = df!(
            "src_lat" => [1.0, 2.0],
            "src_long" => [1.0, 2.0],
            "dst_lat" => [2.0, 1.0],
            "dst_long" => [2.0, 1.0],
            "src_org" => ["acme", "globex"],
            "dst_org" => ["globex", "acme"],
        )
        .unwrap();
        let descriptors = inter_markers(&inter, &PopupConfig::default(), &opts()).unwrap();
        assert_eq!(descriptors.len(), 2);
        let both_roles = &descriptors[0];
        // Two metadata tables concatenated, heights summed.
        assert_eq!(both_roles.html2.matches("<table").count(), 2);
        assert_eq!(both_roles.ipix, 260);
    }

    #[test]
    fn merge_unions_by_location_and_caps_height() {
        let d = |lat: f64, ipix: u32, logo: Option<&str>| MarkerDescriptor {
            lat,
            long: 0.0,
            html1: "<p>a</p>".into(),
            html2: "<p>b</p>".into(),
            logo: logo.map(str::to_string),
            ipix,
        };
        let markers = merge_markers(
            vec![d(1.0, 500, None)],
            vec![d(1.0, 400, Some("http://x/l.png")), d(2.0, 130, None)],
        );
        assert_eq!(markers.len(), 2);
        let merged = &markers[0];
        assert_eq!(merged.ipix, 800);
        assert_eq!(merged.html.matches("<p>a</p>").count(), 2);
        assert_eq!(merged.logo.as_deref(), Some("http://x/l.png"));
        assert_eq!(markers[1].ipix, 130);
    }
}
