pub mod backtest;
pub mod data;
pub mod metrics;
pub mod model;
pub mod report;
pub mod split;

// Re-export commonly used types
pub use backtest::{
    AggregatedTable, BacktestConfig, BacktestEngine, BacktestError, CancellationToken,
    FoldExecutor, ResultAggregator, RunConfig,
};
pub use data::{ColumnKey, SeriesLoader, TimeSeries};
pub use metrics::{BuiltinMetric, Metric, MetricRecord, MetricSet, ScoreTable, Scorer, ScoringConfig};
pub use model::{FittedModel, Forecaster, ModelKind, PredictionFrame};
pub use report::{BacktestReport, BacktestSummary, ExportFormat, ScoreCell};
pub use split::{SplitScheme, SplitSchemeConfig, SplitSpec, WindowType};
