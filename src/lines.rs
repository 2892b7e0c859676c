//! Line assembly: one line per unique unordered location pair among the
//! inter flows, colored by a pluggable rule.

use std::collections::HashSet;

use polars::prelude::*;
use tracing::debug;

use crate::error::FlowMapError;
use crate::popup::{build_popup, PopupConfig};
use crate::schema::coords;

/// Line popup height cap.
const MAX_LINE_PX: u32 = 800;

/// Picks a line color from the combined subset of flows between two
/// locations (both directions).
pub trait ColorRule {
    fn color(&self, flows: &DataFrame) -> String;
}

impl<F> ColorRule for F
where
    F: Fn(&DataFrame) -> String,
{
    fn color(&self, flows: &DataFrame) -> String {
        self(flows)
    }
}

/// Default rule: every line is the same fixed color.
pub struct FixedColor(pub String);

impl Default for FixedColor {
    fn default() -> Self {
        Self("green".into())
    }
}

impl ColorRule for FixedColor {
    fn color(&self, _flows: &DataFrame) -> String {
        self.0.clone()
    }
}

/// One rendered line between two locations.
#[derive(Debug, Clone)]
pub struct Line {
    pub a: (f64, f64),
    pub b: (f64, f64),
    pub color: String,
    pub opacity: f64,
    pub html: String,
    pub ipix: u32,
}

/// Distinct ordered coordinate quadruples, first-seen order.
fn ordered_pairs(inter: &DataFrame) -> Result<Vec<[f64; 4]>, FlowMapError> {
    let src_lat = inter.column(coords::SRC_LAT)?.f64()?.clone();
    let src_long = inter.column(coords::SRC_LONG)?.f64()?.clone();
    let dst_lat = inter.column(coords::DST_LAT)?.f64()?.clone();
    let dst_long = inter.column(coords::DST_LONG)?.f64()?.clone();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for i in 0..inter.height() {
        let (Some(a), Some(b), Some(c), Some(d)) = (
            src_lat.get(i),
            src_long.get(i),
            dst_lat.get(i),
            dst_long.get(i),
        ) else {
            continue;
        };
        let quad = [a, b, c, d];
        if seen.insert(quad.map(f64::to_bits)) {
            out.push(quad);
        }
    }
    Ok(out)
}

fn reverse(quad: &[f64; 4]) -> [f64; 4] {
    [quad[2], quad[3], quad[0], quad[1]]
}

/// Collapse ordered pairs into unordered ones: scanning in order, each
/// not-yet-removed candidate marks the first occurrence of its reverse pair
/// for removal, so exactly one candidate survives per unordered pair.
fn dedup_bidirectional(pairs: &[[f64; 4]]) -> Vec<[f64; 4]> {
    let keys: Vec<[u64; 4]> = pairs.iter().map(|q| q.map(f64::to_bits)).collect();
    let mut removed: HashSet<usize> = HashSet::new();

    for i in 0..pairs.len() {
        if removed.contains(&i) {
            continue;
        }
        let rev = reverse(&pairs[i]).map(f64::to_bits);
        if let Some(j) = keys.iter().position(|k| *k == rev) {
            removed.insert(j);
        }
    }

    pairs
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, q)| *q)
        .collect()
}

/// All inter rows flowing in either direction between the pair's endpoints.
fn pair_subset(inter: &DataFrame, quad: &[f64; 4]) -> Result<DataFrame, FlowMapError> {
    let forward = col(coords::SRC_LAT)
        .eq(lit(quad[0]))
        .and(col(coords::SRC_LONG).eq(lit(quad[1])))
        .and(col(coords::DST_LAT).eq(lit(quad[2])))
        .and(col(coords::DST_LONG).eq(lit(quad[3])));
    let backward = col(coords::SRC_LAT)
        .eq(lit(quad[2]))
        .and(col(coords::SRC_LONG).eq(lit(quad[3])))
        .and(col(coords::DST_LAT).eq(lit(quad[0])))
        .and(col(coords::DST_LONG).eq(lit(quad[1])));

    Ok(inter.clone().lazy().filter(forward.or(backward)).collect()?)
}

/// Emit one line per unique unordered location pair.
pub fn assemble_lines(
    inter: &DataFrame,
    cfg: &PopupConfig,
    rule: &dyn ColorRule,
    opacity: f64,
) -> Result<Vec<Line>, FlowMapError> {
    let survivors = dedup_bidirectional(&ordered_pairs(inter)?);

    let mut lines = Vec::with_capacity(survivors.len());
    for quad in survivors {
        let subset = pair_subset(inter, &quad)?;
        let color = rule.color(&subset);
        let (html, ipix) = build_popup(&subset, cfg, true)?;
        lines.push(Line {
            a: (quad[0], quad[1]),
            b: (quad[2], quad[3]),
            color,
            opacity,
            html,
            ipix: ipix.min(MAX_LINE_PX),
        });
    }
    debug!(lines = lines.len(), "assembled lines");
    Ok(lines)
}
