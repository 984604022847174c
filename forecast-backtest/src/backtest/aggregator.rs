//! Fan-in of split results into one long-format table.
//!
//! Results may arrive in any order. `finalize` sorts them canonically by
//! split key, then training rows before test rows, then date, and runs the
//! row-count checks. Check failures are attached to the split as warnings.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::split::SplitSpec;

use super::fold::{FoldResult, FoldRow};

/// Non-fatal inconsistency found while merging split results.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityWarning {
    #[error("expected {expected} test rows, got {got}")]
    TestRowCount { expected: usize, got: usize },

    #[error("expected {expected} training rows, got {got}")]
    TrainRowCount { expected: usize, got: usize },

    #[error("duplicate result for split, later result discarded")]
    DuplicateSplit,

    #[error("date {0} appears more than once")]
    DuplicateDate(NaiveDate),
}

/// Per-split metadata carried next to the rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitMeta {
    pub split: SplitSpec,
    pub training_scale: Option<f64>,
    pub warnings: Vec<IntegrityWarning>,
}

/// Collects `FoldResult`s as splits complete.
#[derive(Debug)]
pub struct ResultAggregator {
    forecast_horizon: usize,
    include_training_predictions: bool,
    results: BTreeMap<usize, FoldResult>,
    duplicates: BTreeMap<usize, usize>,
}

impl ResultAggregator {
    pub fn new(forecast_horizon: usize) -> Self {
        Self {
            forecast_horizon,
            include_training_predictions: false,
            results: BTreeMap::new(),
            duplicates: BTreeMap::new(),
        }
    }

    /// Expect training rows for every split.
    pub fn with_training_predictions(mut self, include: bool) -> Self {
        self.include_training_predictions = include;
        self
    }

    /// Add one split's result. A second result for the same split key is
    /// discarded and recorded as a warning; returns whether it was kept.
    pub fn accumulate(&mut self, result: FoldResult) -> bool {
        let key = result.split_key();
        if self.results.contains_key(&key) {
            warn!("Split {}: duplicate result discarded", key);
            *self.duplicates.entry(key).or_insert(0) += 1;
            return false;
        }
        self.results.insert(key, result);
        true
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Merge everything accumulated into the canonical table.
    pub fn finalize(self) -> AggregatedTable {
        let mut rows = Vec::new();
        let mut splits = Vec::with_capacity(self.results.len());

        for (key, result) in self.results {
            let mut warnings = Vec::new();

            let test_rows = result.test_rows().count();
            if test_rows != self.forecast_horizon {
                warnings.push(IntegrityWarning::TestRowCount {
                    expected: self.forecast_horizon,
                    got: test_rows,
                });
            }

            if self.include_training_predictions {
                let train_rows = result.training_rows().count();
                if train_rows != result.split.train_len() {
                    warnings.push(IntegrityWarning::TrainRowCount {
                        expected: result.split.train_len(),
                        got: train_rows,
                    });
                }
            }

            let mut seen = HashSet::new();
            for row in &result.rows {
                if !seen.insert((row.date, row.is_training_row)) {
                    warnings.push(IntegrityWarning::DuplicateDate(row.date));
                }
            }

            for _ in 0..self.duplicates.get(&key).copied().unwrap_or(0) {
                warnings.push(IntegrityWarning::DuplicateSplit);
            }

            for warning in &warnings {
                warn!("Split {}: {}", key, warning);
            }

            splits.push(SplitMeta {
                split: result.split,
                training_scale: result.training_scale,
                warnings,
            });
            rows.extend(result.rows);
        }

        rows.sort_by_key(|r| (r.split_key, !r.is_training_row, r.date));

        AggregatedTable { rows, splits }
    }
}

/// All split rows in canonical order, plus per-split metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedTable {
    rows: Vec<FoldRow>,
    splits: Vec<SplitMeta>,
}

impl AggregatedTable {
    pub fn rows(&self) -> &[FoldRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Metadata of every merged split, ordered by key.
    pub fn splits(&self) -> &[SplitMeta] {
        &self.splits
    }

    pub fn split_keys(&self) -> Vec<usize> {
        self.splits.iter().map(|m| m.split.split_key).collect()
    }

    pub fn contains_split(&self, split_key: usize) -> bool {
        self.split_meta(split_key).is_some()
    }

    pub fn split_meta(&self, split_key: usize) -> Option<&SplitMeta> {
        self.splits
            .binary_search_by_key(&split_key, |m| m.split.split_key)
            .ok()
            .map(|i| &self.splits[i])
    }

    /// Rows of one split; empty when the split is absent.
    pub fn rows_for_split(&self, split_key: usize) -> &[FoldRow] {
        let start = self.rows.partition_point(|r| r.split_key < split_key);
        let end = self.rows.partition_point(|r| r.split_key <= split_key);
        &self.rows[start..end]
    }

    /// Every integrity warning with its split key.
    pub fn warnings(&self) -> impl Iterator<Item = (usize, &IntegrityWarning)> {
        self.splits
            .iter()
            .flat_map(|m| m.warnings.iter().map(move |w| (m.split.split_key, w)))
    }

    /// One row per date of a split with training and test columns side by side.
    pub fn wide(&self, split_key: usize) -> Option<WideSplitTable> {
        self.split_meta(split_key)?;

        let mut by_date: BTreeMap<NaiveDate, WideRow> = BTreeMap::new();
        for row in self.rows_for_split(split_key) {
            let entry = by_date.entry(row.date).or_insert_with(|| WideRow {
                date: row.date,
                ..Default::default()
            });
            if row.is_training_row {
                entry.train_actual = Some(row.actual);
                entry.train_predicted = row.predicted;
            } else {
                entry.test_actual = Some(row.actual);
                entry.test_predicted = row.predicted;
            }
        }

        Some(WideSplitTable {
            split_key,
            rows: by_date.into_values().collect(),
        })
    }
}

/// A date row of a wide split table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WideRow {
    pub date: NaiveDate,
    pub train_actual: Option<f64>,
    pub train_predicted: Option<f64>,
    pub test_actual: Option<f64>,
    pub test_predicted: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideSplitTable {
    pub split_key: usize,
    pub rows: Vec<WideRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::fold::tests::{stub, Stub};
    use crate::backtest::fold::FoldExecutor;
    use crate::data::series::tests::daily_series;
    use crate::split::{generate, WindowType};

    fn results(include_training: bool) -> Vec<FoldResult> {
        let series = daily_series(30, |i| i as f64);
        let executor = FoldExecutor::new(&series).with_training_predictions(include_training);
        generate(30, 15, 5, 5, WindowType::Expanding, None)
            .unwrap()
            .iter()
            .map(|split| executor.run(split, &stub(Stub::Position)).unwrap())
            .collect()
    }

    #[test]
    fn test_finalize_is_order_independent() {
        let forward = results(true);
        assert_eq!(forward.len(), 3);

        let mut a = ResultAggregator::new(5).with_training_predictions(true);
        for r in forward.clone() {
            assert!(a.accumulate(r));
        }
        let mut b = ResultAggregator::new(5).with_training_predictions(true);
        for r in forward.into_iter().rev() {
            b.accumulate(r);
        }

        let a = a.finalize();
        let b = b.finalize();
        assert_eq!(a, b);
        assert_eq!(a.split_keys(), vec![0, 1, 2]);
        assert_eq!(a.warnings().count(), 0);

        let rows = a.rows_for_split(1);
        assert_eq!(rows.len(), 20 + 5);
        assert!(rows[..20].iter().all(|r| r.is_training_row));
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_test_rows_match_split_window() {
        let table = {
            let mut agg = ResultAggregator::new(5);
            for r in results(false) {
                agg.accumulate(r);
            }
            agg.finalize()
        };
        for meta in table.splits() {
            let rows = table.rows_for_split(meta.split.split_key);
            assert_eq!(rows.len(), 5);
            assert!(rows.iter().all(|r| !r.is_training_row));
        }
        assert!(table.rows_for_split(7).is_empty());
        assert!(!table.contains_split(7));
    }

    #[test]
    fn test_duplicate_split_rejected() {
        let first = results(false).remove(0);
        let mut agg = ResultAggregator::new(5);
        assert!(agg.accumulate(first.clone()));
        assert!(!agg.accumulate(first));
        assert_eq!(agg.len(), 1);

        let table = agg.finalize();
        assert_eq!(table.len(), 5);
        let warnings: Vec<_> = table.warnings().collect();
        assert_eq!(warnings, vec![(0, &IntegrityWarning::DuplicateSplit)]);
    }

    #[test]
    fn test_row_count_warnings() {
        let mut short = results(false).remove(0);
        short.rows.pop();

        let mut agg = ResultAggregator::new(5).with_training_predictions(true);
        agg.accumulate(short);
        let table = agg.finalize();

        let meta = table.split_meta(0).unwrap();
        assert!(meta
            .warnings
            .contains(&IntegrityWarning::TestRowCount { expected: 5, got: 4 }));
        assert!(meta
            .warnings
            .contains(&IntegrityWarning::TrainRowCount { expected: 15, got: 0 }));
    }

    #[test]
    fn test_wide_table() {
        let mut agg = ResultAggregator::new(5).with_training_predictions(true);
        for r in results(true) {
            agg.accumulate(r);
        }
        let table = agg.finalize();

        let wide = table.wide(0).unwrap();
        assert_eq!(wide.rows.len(), 20);
        let first = &wide.rows[0];
        assert_eq!(first.train_actual, Some(0.0));
        assert_eq!(first.test_actual, None);
        let last = wide.rows.last().unwrap();
        assert_eq!(last.test_actual, Some(19.0));
        assert_eq!(last.test_predicted, Some(190.0));
        assert_eq!(last.train_predicted, None);

        assert!(table.wide(9).is_none());
    }
}
