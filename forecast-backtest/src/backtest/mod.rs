//! Walk-forward backtesting of forecasting models.
//!
//! - `config`: run options and the TOML run file
//! - `fold`: fit/predict for a single split, failure capture
//! - `aggregator`: fan-in of split results into one canonical table
//! - `engine`: split planning and parallel execution

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod fold;

pub use aggregator::{AggregatedTable, IntegrityWarning, ResultAggregator, SplitMeta, WideRow, WideSplitTable};
pub use config::{BacktestConfig, RunConfig};
pub use engine::{BacktestEngine, BacktestError, BacktestResult, CancellationToken, ProgressFn, SkipReason};
pub use fold::{FoldError, FoldErrorKind, FoldExecutor, FoldResult, FoldRow, SplitFailure};
