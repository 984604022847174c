//! Column identifiers for backtest result tables.
//!
//! Every table the engine emits (long-format results, per-split wide tables,
//! metric records) is keyed by one of these identifiers, so exports and
//! metric functions agree on a single schema.

use serde::{Deserialize, Serialize};

/// Closed set of column keys used across result tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKey {
    Date,
    SplitKey,
    Actual,
    Predicted,
    IsTrainingRow,
    TrainActual,
    TrainPredicted,
    TestActual,
    TestPredicted,
    MetricName,
    MetricValue,
    IsTrainingMetric,
    MetricError,
}

impl ColumnKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::SplitKey => "split_key",
            Self::Actual => "actual",
            Self::Predicted => "predicted",
            Self::IsTrainingRow => "is_training_row",
            Self::TrainActual => "train_actual",
            Self::TrainPredicted => "train_predicted",
            Self::TestActual => "test_actual",
            Self::TestPredicted => "test_predicted",
            Self::MetricName => "metric_name",
            Self::MetricValue => "metric_value",
            Self::IsTrainingMetric => "is_training_metric",
            Self::MetricError => "metric_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        ALL_COLUMNS.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_COLUMNS: &[ColumnKey] = &[
    ColumnKey::Date,
    ColumnKey::SplitKey,
    ColumnKey::Actual,
    ColumnKey::Predicted,
    ColumnKey::IsTrainingRow,
    ColumnKey::TrainActual,
    ColumnKey::TrainPredicted,
    ColumnKey::TestActual,
    ColumnKey::TestPredicted,
    ColumnKey::MetricName,
    ColumnKey::MetricValue,
    ColumnKey::IsTrainingMetric,
    ColumnKey::MetricError,
];

/// Columns of the long-format aggregated result table, in export order.
pub const RESULT_COLUMNS: &[ColumnKey] = &[
    ColumnKey::Date,
    ColumnKey::SplitKey,
    ColumnKey::Actual,
    ColumnKey::Predicted,
    ColumnKey::IsTrainingRow,
];

/// Columns of a per-split wide table, in export order.
pub const WIDE_COLUMNS: &[ColumnKey] = &[
    ColumnKey::Date,
    ColumnKey::TrainActual,
    ColumnKey::TrainPredicted,
    ColumnKey::TestActual,
    ColumnKey::TestPredicted,
];

/// Columns of the metric record table, in export order.
pub const METRIC_COLUMNS: &[ColumnKey] = &[
    ColumnKey::SplitKey,
    ColumnKey::MetricName,
    ColumnKey::MetricValue,
    ColumnKey::IsTrainingMetric,
    ColumnKey::MetricError,
];
