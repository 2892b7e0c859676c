//! Category-centroid aggregation.
//!
//! Collapses many distinct locations into one representative location per
//! category value (e.g. city → region) by averaging every coordinate that
//! was recorded for the category, in either role.

use std::collections::HashMap;

use polars::prelude::*;

use crate::error::FlowMapError;
use crate::schema::{coords, DST_PREFIX, SRC_PREFIX};
use crate::table::fmt_any;

/// Mean coordinate for one category value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub lat: f64,
    pub long: f64,
}

/// Build the category → centroid map.
///
/// For each distinct value found in `src_<category>` or `dst_<category>`,
/// the centroid latitude is the sum of all `src_lat` where the source
/// category matches plus all `dst_lat` where the destination category
/// matches, divided by the combined row count; longitude analogous. Each
/// contributing row is counted once per role it matches.
pub fn build_centroids(
    df: &DataFrame,
    category: &str,
) -> Result<HashMap<String, Centroid>, FlowMapError> {
    let src_cat = df
        .column(&format!("{SRC_PREFIX}{category}"))?
        .as_materialized_series()
        .clone();
    let dst_cat = df
        .column(&format!("{DST_PREFIX}{category}"))?
        .as_materialized_series()
        .clone();

    let src_lat = df.column(coords::SRC_LAT)?.f64()?.clone();
    let src_long = df.column(coords::SRC_LONG)?.f64()?.clone();
    let dst_lat = df.column(coords::DST_LAT)?.f64()?.clone();
    let dst_long = df.column(coords::DST_LONG)?.f64()?.clone();

    // value → (lat sum, long sum, count)
    let mut buckets: HashMap<String, (f64, f64, usize)> = HashMap::new();
    for i in 0..df.height() {
        let src_key = fmt_any(&src_cat.get(i)?);
        let entry = buckets.entry(src_key).or_insert((0.0, 0.0, 0));
        entry.0 += src_lat.get(i).unwrap_or(0.0);
        entry.1 += src_long.get(i).unwrap_or(0.0);
        entry.2 += 1;

        let dst_key = fmt_any(&dst_cat.get(i)?);
        let entry = buckets.entry(dst_key).or_insert((0.0, 0.0, 0));
        entry.0 += dst_lat.get(i).unwrap_or(0.0);
        entry.1 += dst_long.get(i).unwrap_or(0.0);
        entry.2 += 1;
    }

    Ok(buckets
        .into_iter()
        .map(|(value, (lat_sum, long_sum, count))| {
            (
                value,
                Centroid {
                    lat: lat_sum / count as f64,
                    long: long_sum / count as f64,
                },
            )
        })
        .collect())
}

/// Rewrite all four coordinate columns through the centroid lookup.
pub fn apply_centroids(
    df: &mut DataFrame,
    category: &str,
    centroids: &HashMap<String, Centroid>,
) -> Result<(), FlowMapError> {
    let src_cat = df
        .column(&format!("{SRC_PREFIX}{category}"))?
        .as_materialized_series()
        .clone();
    let dst_cat = df
        .column(&format!("{DST_PREFIX}{category}"))?
        .as_materialized_series()
        .clone();

    let n = df.height();
    let mut src_lat = Vec::with_capacity(n);
    let mut src_long = Vec::with_capacity(n);
    let mut dst_lat = Vec::with_capacity(n);
    let mut dst_long = Vec::with_capacity(n);

    for i in 0..n {
        let src = centroids
            .get(&fmt_any(&src_cat.get(i)?))
            .copied()
            .ok_or_else(|| {
                FlowMapError::General(format!("no centroid for source category at row {i}"))
            })?;
        let dst = centroids
            .get(&fmt_any(&dst_cat.get(i)?))
            .copied()
            .ok_or_else(|| {
                FlowMapError::General(format!("no centroid for destination category at row {i}"))
            })?;
        src_lat.push(src.lat);
        src_long.push(src.long);
        dst_lat.push(dst.lat);
        dst_long.push(dst.long);
    }

    df.with_column(Series::new(coords::SRC_LAT.into(), src_lat))?;
    df.with_column(Series::new(coords::SRC_LONG.into(), src_long))?;
    df.with_column(Series::new(coords::DST_LAT.into(), dst_lat))?;
    df.with_column(Series::new(coords::DST_LONG.into(), dst_long))?;
    Ok(())
}
