//! Forecast accuracy scoring.
//!
//! - `functions`: built-in metrics and the `Metric` trait for user metrics
//! - `scorer`: per-split, per-group application of a metric set

pub mod functions;
pub mod scorer;

pub use functions::{naive_scale, BuiltinMetric, Metric, MetricContext, MetricError};
pub use scorer::{
    MetricOutcome, MetricRecord, MetricSet, MetricSummary, ScoreTable, Scorer, ScoringConfig,
};
