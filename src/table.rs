use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;
use tracing::debug;

use crate::aggregation::{self, Centroid};
use crate::error::FlowMapError;
use crate::schema::{self, coords};

/// Validated store of flow records.
///
/// Every row carries a source location (`src_lat`, `src_long`) and a
/// destination location (`dst_lat`, `dst_long`) plus arbitrary paired and
/// shared attribute columns.
pub struct FlowTable {
    df: DataFrame,
    backup: Option<(DataFrame, Option<DataFrame>)>,
    /// Original coordinate columns, cached on the first `aggregate` call so
    /// later aggregations by a different category start from the originals.
    /// Kept row-aligned with `df` across `focus`/`restore`.
    coord_cache: Option<DataFrame>,
}

/// Prefix for the cache columns temporarily attached during `focus` so they
/// travel through the filter with their rows.
const SHADOW_PREFIX: &str = "__orig_";

impl FlowTable {
    /// Validate and store a working copy of the input.
    ///
    /// Fails unless all four coordinate columns are present; coordinates are
    /// cast to `Float64` up front so grouping and centroid math never hit a
    /// stray string column.
    pub fn new(df: DataFrame) -> Result<Self, FlowMapError> {
        schema::require_columns(&df, &coords::ALL)?;

        let df = df
            .lazy()
            .with_columns(
                coords::ALL
                    .iter()
                    .map(|c| col(*c).cast(DataType::Float64))
                    .collect::<Vec<_>>(),
            )
            .collect()?;

        Ok(Self {
            df,
            backup: None,
            coord_cache: None,
        })
    }

    /// Load a flow table from a headered CSV file.
    ///
    /// Column names are trimmed of surrounding whitespace before validation.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, FlowMapError> {
        let mut df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
            .finish()?;

        let trimmed: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        df.set_column_names(trimmed.as_slice())?;

        Self::new(df)
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// Paired attributes of the working table (see [`schema::paired_attributes`]).
    pub fn paired_attributes(&self) -> Vec<String> {
        schema::paired_attributes(&self.df)
    }

    /// Replace the working table with the rows matching `predicate`.
    ///
    /// The pre-filter table is kept for [`FlowTable::restore`]. If no row
    /// matches, the working table is left untouched and
    /// [`FlowMapError::EmptyResult`] is returned so the caller knows the
    /// filter had no effect.
    pub fn focus(&mut self, predicate: Expr) -> Result<(), FlowMapError> {
        // Attach cached original coordinates as shadow columns so the filter
        // keeps them row-aligned with the surviving rows.
        let mut working = self.df.clone();
        if let Some(cache) = &self.coord_cache {
            for name in coords::ALL {
                let shadow = cache
                    .column(name)?
                    .as_materialized_series()
                    .clone()
                    .with_name(format!("{SHADOW_PREFIX}{name}").into());
                working.with_column(shadow)?;
            }
        }

        let mut filtered = working.lazy().filter(predicate).collect()?;
        if filtered.height() == 0 {
            return Err(FlowMapError::EmptyResult);
        }
        debug!(
            before = self.df.height(),
            after = filtered.height(),
            "focused flow table"
        );

        let filtered_cache = match &self.coord_cache {
            Some(_) => {
                let shadow_names: Vec<String> = coords::ALL
                    .iter()
                    .map(|n| format!("{SHADOW_PREFIX}{n}"))
                    .collect();
                let mut kept = filtered.select(shadow_names.iter().map(String::as_str))?;
                kept.set_column_names(coords::ALL)?;
                filtered = filtered.drop_many(shadow_names);
                Some(kept)
            }
            None => None,
        };

        let prev_df = std::mem::replace(&mut self.df, filtered);
        let prev_cache = std::mem::replace(&mut self.coord_cache, filtered_cache);
        self.backup = Some((prev_df, prev_cache));
        Ok(())
    }

    /// Put back the table saved by the most recent successful `focus`.
    pub fn restore(&mut self) {
        if let Some((df, cache)) = self.backup.take() {
            self.df = df;
            self.coord_cache = cache;
        }
    }

    /// Partition the table into `(intra, inter)` flows.
    ///
    /// intra = source and destination resolve to the same location,
    /// inter = everything else. The partition is total and disjoint.
    pub fn split(&self) -> Result<(DataFrame, DataFrame), FlowMapError> {
        let same_location = col(coords::SRC_LAT)
            .eq(col(coords::DST_LAT))
            .and(col(coords::SRC_LONG).eq(col(coords::DST_LONG)));

        let intra = self
            .df
            .clone()
            .lazy()
            .filter(same_location.clone())
            .collect()?;
        let inter = self.df.clone().lazy().filter(same_location.not()).collect()?;

        debug!(intra = intra.height(), inter = inter.height(), "split flows");
        Ok((intra, inter))
    }

    /// Collapse locations to category-level centroids.
    ///
    /// Requires `src_<category>` and `dst_<category>` columns. Every row's
    /// four coordinate columns are rewritten through a category → centroid
    /// lookup, where each centroid is the mean of all source- and
    /// destination-role coordinates recorded for that category value.
    ///
    /// The original coordinates are cached on the first call and restored
    /// before every later call, so aggregating by a second category operates
    /// on the original coordinates rather than already-aggregated ones.
    pub fn aggregate(&mut self, category: &str) -> Result<HashMap<String, Centroid>, FlowMapError> {
        let src_col = format!("{}{category}", schema::SRC_PREFIX);
        let dst_col = format!("{}{category}", schema::DST_PREFIX);
        schema::require_columns(&self.df, &[&src_col, &dst_col])?;

        match &self.coord_cache {
            Some(cache) => {
                for name in coords::ALL {
                    let original = cache.column(name)?.as_materialized_series().clone();
                    self.df.with_column(original)?;
                }
            }
            None => self.coord_cache = Some(self.df.select(coords::ALL)?),
        }

        let centroids = aggregation::build_centroids(&self.df, category)?;
        aggregation::apply_centroids(&mut self.df, category, &centroids)?;
        debug!(category, groups = centroids.len(), "aggregated coordinates");
        Ok(centroids)
    }
}

/// Render a cell value for display. Strings come out bare (no quoting),
/// nulls come out empty.
pub(crate) fn fmt_any(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        other => format!("{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            "src_lat" => [1.0, 1.0, 3.0],
            "src_long" => [1.0, 1.0, 4.0],
            "dst_lat" => [1.0, 2.0, 1.0],
            "dst_long" => [1.0, 2.0, 1.0],
            "bytes" => [10i64, 20, 30],
        )
        .unwrap()
    }

    #[test]
    fn rejects_missing_coordinate_columns() {
        let df = df!("src_lat" => [1.0], "src_long" => [1.0]).unwrap();
        assert!(matches!(
            FlowTable::new(df),
            Err(FlowMapError::Schema(_))
        ));
    }

    #[test]
    fn casts_coordinates_to_float() {
        let df = df!(
            "src_lat" => [1i64], "src_long" => [2i64],
            "dst_lat" => [3i64], "dst_long" => [4i64],
        )
        .unwrap();
        let table = FlowTable::new(df).unwrap();
        for name in coords::ALL {
            assert_eq!(table.df().column(name).unwrap().dtype(), &DataType::Float64);
        }
    }

    #[test]
    fn focus_filters_and_restore_recovers() {
        let mut table = FlowTable::new(sample()).unwrap();
        table.focus(col("bytes").gt(lit(15))).unwrap();
        assert_eq!(table.height(), 2);
        table.restore();
        assert_eq!(table.height(), 3);
    }

    #[test]
    fn empty_focus_leaves_table_unchanged() {
        let mut table = FlowTable::new(sample()).unwrap();
        let err = table.focus(col("bytes").gt(lit(1000))).unwrap_err();
        assert!(matches!(err, FlowMapError::EmptyResult));
        assert_eq!(table.height(), 3);
    }

    #[test]
    fn split_is_total_and_disjoint() {
        let table = FlowTable::new(sample()).unwrap();
        let (intra, inter) = table.split().unwrap();
        assert_eq!(intra.height() + inter.height(), table.height());
        assert_eq!(intra.height(), 1);
        assert_eq!(inter.height(), 2);
    }

    #[test]
    fn focus_between_aggregations_realigns_cached_coordinates() {
        let df = df!(
            "src_lat" => [1.0, 5.0, 9.0],
            "src_long" => [1.0, 5.0, 9.0],
            "dst_lat" => [3.0, 7.0, 11.0],
            "dst_long" => [3.0, 7.0, 11.0],
            "src_region" => ["w", "w", "e"],
            "dst_region" => ["w", "w", "e"],
            "src_city" => ["a", "a", "c"],
            "dst_city" => ["b", "b", "c"],
            "bytes" => [10i64, 20, 30],
        )
        .unwrap();
        let mut table = FlowTable::new(df).unwrap();

        table.aggregate("region").unwrap();
        table.focus(col("bytes").lt(lit(25))).unwrap();
        assert_eq!(table.height(), 2);

        // The second aggregation runs on the filtered table and its centroids
        // come from the original coordinates, not the region-level ones.
        let centroids = table.aggregate("city").unwrap();
        assert_eq!(centroids["a"].lat, 3.0); // mean of src 1.0 and 5.0
        assert_eq!(centroids["b"].lat, 5.0); // mean of dst 3.0 and 7.0

        // Restore rolls back both the rows and the coordinate cache.
        table.restore();
        assert_eq!(table.height(), 3);
        let centroids = table.aggregate("city").unwrap();
        assert_eq!(centroids["c"].lat, 10.0); // mean of src 9.0 and dst 11.0
    }

    #[test]
    fn split_self_loops_only() {
        let df = df!(
            "src_lat" => [1.0, 1.0], "src_long" => [1.0, 1.0],
            "dst_lat" => [1.0, 1.0], "dst_long" => [1.0, 1.0],
        )
        .unwrap();
        let table = FlowTable::new(df).unwrap();
        let (intra, inter) = table.split().unwrap();
        assert_eq!(intra.height(), 2);
        assert_eq!(inter.height(), 0);
    }
}
