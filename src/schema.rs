/// Column-name constants and schema validation for flow tables.
/// Single source of truth for the src_/dst_ column convention.
use polars::prelude::DataFrame;

use crate::error::FlowMapError;

// ── Coordinate columns ──────────────────────────────────────────────────────
pub mod coords {
    pub const SRC_LAT: &str = "src_lat";
    pub const SRC_LONG: &str = "src_long";
    pub const DST_LAT: &str = "dst_lat";
    pub const DST_LONG: &str = "dst_long";

    pub const ALL: [&str; 4] = [SRC_LAT, SRC_LONG, DST_LAT, DST_LONG];
}

// ── Role prefixes ───────────────────────────────────────────────────────────
pub const SRC_PREFIX: &str = "src_";
pub const DST_PREFIX: &str = "dst_";

/// The paired attribute that carries logo image markup, when present.
pub const LOGO_ATTR: &str = "logo";

/// Fail unless every named column is present.
pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), FlowMapError> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(FlowMapError::Schema(format!("missing column: {name}")));
        }
    }
    Ok(())
}

/// Enumerate the paired attributes of a table.
///
/// An attribute `a` is paired only when both `src_a` and `dst_a` columns
/// exist; a lone prefixed column (or a column that merely starts with "src")
/// is a shared column and never qualifies. Coordinate columns are excluded
/// since they are structural, not descriptive.
pub fn paired_attributes(df: &DataFrame) -> Vec<String> {
    let names: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut attrs = Vec::new();
    for name in &names {
        if let Some(attr) = name.strip_prefix(SRC_PREFIX) {
            if attr == "lat" || attr == "long" {
                continue;
            }
            let twin = format!("{DST_PREFIX}{attr}");
            if names.iter().any(|n| n == &twin) {
                attrs.push(attr.to_string());
            }
        }
    }
    attrs
}
