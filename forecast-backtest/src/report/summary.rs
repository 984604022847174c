//! Human- and machine-readable run summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backtest::FoldErrorKind;
use crate::metrics::{MetricSummary, ScoreTable};

use super::BacktestReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub split_key: usize,
    pub kind: FoldErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningEntry {
    pub split_key: usize,
    pub message: String,
}

/// Condensed view of a report and its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub splits_planned: usize,
    pub splits_completed: usize,
    pub splits_failed: usize,
    pub splits_skipped: usize,
    pub cancelled: bool,
    pub rows: usize,
    pub failures: Vec<FailureEntry>,
    pub warnings: Vec<WarningEntry>,
    pub metrics: Vec<MetricSummary>,
}

impl BacktestSummary {
    pub fn new(report: &BacktestReport, scores: &ScoreTable) -> Self {
        let not_run = report.failures.len() + report.skipped.len();
        let metrics = scores
            .summarize()
            .into_iter()
            .map(|mut m| {
                m.not_run = not_run;
                m
            })
            .collect();

        Self {
            splits_planned: report.splits.len(),
            splits_completed: report.completed(),
            splits_failed: report.failures.len(),
            splits_skipped: report.skipped.len(),
            cancelled: report.cancelled,
            rows: report.table.len(),
            failures: report
                .sorted_failures()
                .into_iter()
                .map(|f| FailureEntry {
                    split_key: f.split_key(),
                    kind: f.kind(),
                    message: f.message(),
                })
                .collect(),
            warnings: report
                .table
                .warnings()
                .map(|(split_key, w)| WarningEntry {
                    split_key,
                    message: w.to_string(),
                })
                .collect(),
            metrics,
        }
    }

    pub fn all_completed(&self) -> bool {
        self.splits_completed == self.splits_planned
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for BacktestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== BACKTEST SUMMARY ===")?;
        writeln!(
            f,
            "Splits: {} planned, {} completed, {} failed, {} skipped{}",
            self.splits_planned,
            self.splits_completed,
            self.splits_failed,
            self.splits_skipped,
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        writeln!(f, "Result rows: {}", self.rows)?;

        if !self.metrics.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:<12} {:<6} {:>10} {:>10} {:>10} {:>5} {:>5}",
                "metric", "set", "mean", "min", "max", "ok", "fail"
            )?;
            for m in &self.metrics {
                writeln!(
                    f,
                    "{:<12} {:<6} {:>10} {:>10} {:>10} {:>5} {:>5}",
                    m.metric_name,
                    if m.is_training_metric { "train" } else { "test" },
                    fmt_opt(m.mean),
                    fmt_opt(m.min),
                    fmt_opt(m.max),
                    m.computed,
                    m.failed
                )?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failed splits:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  [{}] {}: {}",
                    failure.split_key,
                    failure.kind.as_str(),
                    failure.message
                )?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Integrity warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  [{}] {}", warning.split_key, warning.message)?;
            }
        }

        Ok(())
    }
}
