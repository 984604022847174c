//! Per-split scoring of an aggregated table.
//!
//! Rows are grouped by (split_key, is_training_row) and every metric in the
//! set is applied to each group independently. A failing metric only affects
//! its own (split, metric) record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use crate::backtest::{AggregatedTable, FoldRow};

use super::functions::{BuiltinMetric, Metric, MetricContext, MetricError};

/// Named metrics, iterated in name order.
#[derive(Clone, Default)]
pub struct MetricSet {
    metrics: BTreeMap<String, Arc<dyn Metric>>,
}

impl fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.metrics.keys()).finish()
    }
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin(metrics: &[BuiltinMetric]) -> Self {
        metrics
            .iter()
            .fold(Self::new(), |set, m| set.with(m.as_str(), *m))
    }

    /// The default metric selection.
    pub fn defaults() -> Self {
        Self::builtin(&BuiltinMetric::defaults())
    }

    /// Add or replace a metric under `name`.
    pub fn with(mut self, name: &str, metric: impl Metric + 'static) -> Self {
        self.insert(name, metric);
        self
    }

    pub fn insert(&mut self, name: &str, metric: impl Metric + 'static) {
        self.metrics.insert(name.to_string(), Arc::new(metric));
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Metric)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

/// Scoring options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Also score training rows (requires training predictions).
    pub include_training_metrics: bool,
    /// Drop rows without a prediction instead of failing the metric.
    pub skip_missing: bool,
}

/// Result of one metric on one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOutcome {
    Value(f64),
    Failed(MetricError),
}

impl MetricOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&MetricError> {
        match self {
            Self::Value(_) => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// A metric that returns a non-finite value counts as failed.
impl From<Result<f64, MetricError>> for MetricOutcome {
    fn from(result: Result<f64, MetricError>) -> Self {
        match result {
            Ok(v) if v.is_finite() => Self::Value(v),
            Ok(_) => Self::Failed(MetricError::NonFinite),
            Err(e) => Self::Failed(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub split_key: usize,
    pub metric_name: String,
    pub metric_value: MetricOutcome,
    pub is_training_metric: bool,
}

/// Applies a metric set to aggregated results.
#[derive(Debug, Clone)]
pub struct Scorer {
    metrics: MetricSet,
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(metrics: MetricSet) -> Self {
        Self {
            metrics,
            config: ScoringConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ScoringConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every split in the table. Records are ordered by split key,
    /// test before training, then metric name.
    pub fn score(&self, table: &AggregatedTable) -> ScoreTable {
        let mut records = Vec::new();

        for meta in table.splits() {
            let split_key = meta.split.split_key;
            let rows = table.rows_for_split(split_key);

            let mut groups = vec![false];
            if self.config.include_training_metrics && rows.iter().any(|r| r.is_training_row) {
                groups.push(true);
            }

            for is_training in groups {
                let context = MetricContext {
                    split_key,
                    is_training,
                    training_scale: meta.training_scale,
                };
                let group: Vec<&FoldRow> = rows
                    .iter()
                    .filter(|r| r.is_training_row == is_training)
                    .collect();

                for (name, outcome) in self.score_group(&group, &context) {
                    records.push(MetricRecord {
                        split_key,
                        metric_name: name.to_string(),
                        metric_value: outcome,
                        is_training_metric: is_training,
                    });
                }
            }
        }

        ScoreTable { records }
    }

    fn score_group<'a>(
        &'a self,
        group: &[&FoldRow],
        context: &MetricContext,
    ) -> Vec<(&'a str, MetricOutcome)> {
        let missing = group.iter().filter(|r| r.predicted.is_none()).count();
        if missing > 0 && !self.config.skip_missing {
            return self
                .metrics
                .iter()
                .map(|(name, _)| {
                    (name, MetricOutcome::Failed(MetricError::MissingPredictions { count: missing }))
                })
                .collect();
        }
        if missing > 0 {
            debug!(
                "Split {}: dropping {} rows without prediction",
                context.split_key, missing
            );
        }

        let (actual, predicted): (Vec<f64>, Vec<f64>) = group
            .iter()
            .filter_map(|r| r.predicted.map(|p| (r.actual, p)))
            .unzip();

        self.metrics
            .iter()
            .map(|(name, metric)| (name, metric.evaluate(&actual, &predicted, context).into()))
            .collect()
    }
}

/// All metric records of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreTable {
    records: Vec<MetricRecord>,
}

impl ScoreTable {
    pub fn new(records: Vec<MetricRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_split(&self, split_key: usize) -> impl Iterator<Item = &MetricRecord> {
        self.records.iter().filter(move |r| r.split_key == split_key)
    }

    pub fn get(&self, split_key: usize, metric: &str, is_training: bool) -> Option<&MetricRecord> {
        self.records.iter().find(|r| {
            r.split_key == split_key && r.metric_name == metric && r.is_training_metric == is_training
        })
    }

    /// Cross-split statistics per (metric, train/test).
    pub fn summarize(&self) -> Vec<MetricSummary> {
        let mut groups: BTreeMap<(bool, &str), Vec<&MetricOutcome>> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry((record.is_training_metric, record.metric_name.as_str()))
                .or_default()
                .push(&record.metric_value);
        }

        groups
            .into_iter()
            .map(|((is_training_metric, name), outcomes)| {
                let values: Vec<f64> = outcomes.iter().filter_map(|o| o.value()).collect();
                let (mean, min, max) = if values.is_empty() {
                    (None, None, None)
                } else {
                    (
                        Some(values.iter().mean()),
                        Some(Statistics::min(values.iter())),
                        Some(Statistics::max(values.iter())),
                    )
                };
                MetricSummary {
                    metric_name: name.to_string(),
                    is_training_metric,
                    mean,
                    min,
                    max,
                    computed: values.len(),
                    failed: outcomes.len() - values.len(),
                    not_run: 0,
                }
            })
            .collect()
    }
}

/// Aggregate of one metric across splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_name: String,
    pub is_training_metric: bool,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Splits where the metric was computed.
    pub computed: usize,
    /// Splits that ran but where the metric failed.
    pub failed: usize,
    /// Splits that never produced rows. Filled in by the report.
    pub not_run: usize,
}
