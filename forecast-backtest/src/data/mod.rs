//! Time-series data: the series container, column keys and file loading.

pub mod columns;
pub mod loader;
pub mod series;

pub use columns::{ColumnKey, METRIC_COLUMNS, RESULT_COLUMNS, WIDE_COLUMNS};
pub use loader::{LoaderError, SeriesLoader};
pub use series::{FutureFrame, SeriesError, SeriesResult, Spacing, TimeSeries};
