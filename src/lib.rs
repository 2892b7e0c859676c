//! flowmap: point-to-point geographic flow visualization.
//!
//! Takes a table of flow records (source/destination coordinates plus
//! arbitrary paired attributes), groups them by location and location pair,
//! and emits a self-contained interactive Leaflet map: one marker per unique
//! location, one line per unique unordered location pair, with chart and
//! table popups summarizing the flows.
//!
//! The pipeline is a linear, single-threaded pass over an in-memory polars
//! DataFrame: [`FlowTable`] (validate / focus / aggregate) → split into
//! intra- and inter-flows → marker and line assembly → [`MapDocument`].

pub mod aggregation;
pub mod chart;
pub mod error;
pub mod lines;
mod logo;
pub mod map;
pub mod markers;
pub mod model;
pub mod popup;
pub mod schema;
pub mod table;

pub use chart::{Estimator, PlotKind, PlotSpec};
pub use error::FlowMapError;
pub use lines::{ColorRule, FixedColor, Line};
pub use map::MapDocument;
pub use model::{FlowMap, PopupWidth};
pub use table::FlowTable;
