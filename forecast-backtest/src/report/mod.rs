//! Backtest output.
//!
//! A `BacktestReport` is what the engine hands back: the planned splits, the
//! merged result table, and every split that failed or never ran. Scoring
//! and export work from it.

pub mod export;
pub mod summary;

use serde::{Deserialize, Serialize};

use crate::backtest::{AggregatedTable, FoldErrorKind, SplitFailure};
use crate::metrics::{MetricError, ScoreTable, Scorer};
use crate::split::SplitSpec;

pub use export::{write_report, ExportError, ExportFormat};
pub use summary::BacktestSummary;

/// Outcome of one planned split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStatus {
    Completed,
    Failed,
    Skipped,
}

/// One (split, metric, train/test) cell of a report.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreCell {
    /// The split ran and the metric was computed.
    Value(f64),
    /// The split ran but the metric failed.
    MetricFailed(MetricError),
    /// The split failed during fit or predict.
    SplitFailed(FoldErrorKind),
    /// The split never ran, or nothing was scored for it.
    NotRun,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    /// Every planned split, in key order.
    pub splits: Vec<SplitSpec>,
    pub table: AggregatedTable,
    pub failures: Vec<SplitFailure>,
    /// Splits not dispatched because of cancellation or fail-fast.
    pub skipped: Vec<SplitSpec>,
    pub cancelled: bool,
}

impl BacktestReport {
    pub fn status(&self, split_key: usize) -> Option<SplitStatus> {
        if self.table.contains_split(split_key) {
            Some(SplitStatus::Completed)
        } else if self.failure(split_key).is_some() {
            Some(SplitStatus::Failed)
        } else if self.skipped.iter().any(|s| s.split_key == split_key) {
            Some(SplitStatus::Skipped)
        } else {
            None
        }
    }

    pub fn failure(&self, split_key: usize) -> Option<&SplitFailure> {
        self.failures.iter().find(|f| f.split_key() == split_key)
    }

    /// Failures ordered by split key.
    pub fn sorted_failures(&self) -> Vec<&SplitFailure> {
        let mut failures: Vec<_> = self.failures.iter().collect();
        failures.sort_by_key(|f| f.split_key());
        failures
    }

    pub fn completed(&self) -> usize {
        self.table.splits().len()
    }

    /// Score the merged table.
    pub fn score(&self, scorer: &Scorer) -> ScoreTable {
        scorer.score(&self.table)
    }

    pub fn cell(
        &self,
        scores: &ScoreTable,
        split_key: usize,
        metric: &str,
        is_training: bool,
    ) -> ScoreCell {
        if let Some(failure) = self.failure(split_key) {
            return ScoreCell::SplitFailed(failure.kind());
        }
        match scores.get(split_key, metric, is_training) {
            Some(record) => match record.metric_value.value() {
                Some(value) => ScoreCell::Value(value),
                None => ScoreCell::MetricFailed(
                    record
                        .metric_value
                        .error()
                        .cloned()
                        .unwrap_or(MetricError::NonFinite),
                ),
            },
            None => ScoreCell::NotRun,
        }
    }

    /// Summary for display and JSON output.
    pub fn summarize(&self, scores: &ScoreTable) -> BacktestSummary {
        BacktestSummary::new(self, scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::fold::tests::{stub, Stub};
    use crate::backtest::{BacktestConfig, BacktestEngine};
    use crate::data::series::tests::daily_series;
    use crate::metrics::{BuiltinMetric, MetricSet};

    #[test]
    fn test_cells_distinguish_outcomes() {
        let series = daily_series(30, |i| i as f64);
        let engine = BacktestEngine::new(BacktestConfig {
            min_train_size: 20,
            forecast_horizon: 5,
            incremental_step: 5,
            ..Default::default()
        })
        .unwrap();
        let report = engine.run(&series, stub(Stub::Sparse)).unwrap();
        let scores = report.score(&Scorer::new(MetricSet::builtin(&[BuiltinMetric::Mae])));

        assert!(matches!(
            report.cell(&scores, 0, "mae", false),
            ScoreCell::MetricFailed(MetricError::MissingPredictions { count: 2 })
        ));
        assert_eq!(report.cell(&scores, 0, "rmse", false), ScoreCell::NotRun);
        assert_eq!(report.cell(&scores, 5, "mae", false), ScoreCell::NotRun);
        assert_eq!(report.status(5), None);
        assert_eq!(report.completed(), 2);
    }
}
