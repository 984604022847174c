//! Single-split execution.
//!
//! A fold slices the training window out of the series, fits a fresh model on
//! it and predicts the test window (plus the training window on request).
//! Predict inputs carry dates and regressors only.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::data::{FutureFrame, SeriesError, TimeSeries};
use crate::metrics::naive_scale;
use crate::model::{Forecaster, ModelError, PredictionFrame};
use crate::split::SplitSpec;

/// One (date, split) row of a fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRow {
    pub date: NaiveDate,
    pub split_key: usize,
    pub actual: f64,
    /// `None` when the model returned nothing usable for this date.
    pub predicted: Option<f64>,
    pub is_training_row: bool,
}

/// Rows produced by one successful split.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldResult {
    pub split: SplitSpec,
    pub rows: Vec<FoldRow>,
    /// Mean squared one-step difference over the training window.
    pub training_scale: Option<f64>,
}

impl FoldResult {
    pub fn split_key(&self) -> usize {
        self.split.split_key
    }

    pub fn test_rows(&self) -> impl Iterator<Item = &FoldRow> {
        self.rows.iter().filter(|r| !r.is_training_row)
    }

    pub fn training_rows(&self) -> impl Iterator<Item = &FoldRow> {
        self.rows.iter().filter(|r| r.is_training_row)
    }

    pub fn missing_predictions(&self) -> usize {
        self.rows.iter().filter(|r| r.predicted.is_none()).count()
    }
}

/// Coarse classification of a split failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldErrorKind {
    Fit,
    Predict,
    Timeout,
    Panic,
    Worker,
    Data,
}

impl FoldErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Predict => "predict",
            Self::Timeout => "timeout",
            Self::Panic => "panic",
            Self::Worker => "worker",
            Self::Data => "data",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FoldError {
    #[error("Model fit failed: {0}")]
    Fit(#[source] ModelError),

    #[error("Model predict failed: {0}")]
    Predict(#[source] ModelError),

    #[error("Split exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("Model panicked: {0}")]
    Panicked(String),

    #[error("Could not start split worker: {0}")]
    Worker(String),

    #[error("Series error: {0}")]
    Series(#[from] SeriesError),
}

impl FoldError {
    pub fn kind(&self) -> FoldErrorKind {
        match self {
            Self::Fit(_) => FoldErrorKind::Fit,
            Self::Predict(_) => FoldErrorKind::Predict,
            Self::Timeout(_) => FoldErrorKind::Timeout,
            Self::Panicked(_) => FoldErrorKind::Panic,
            Self::Worker(_) => FoldErrorKind::Worker,
            Self::Series(_) => FoldErrorKind::Data,
        }
    }
}

/// A split that did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFailure {
    pub split: SplitSpec,
    pub error: FoldError,
}

impl SplitFailure {
    pub fn split_key(&self) -> usize {
        self.split.split_key
    }

    pub fn kind(&self) -> FoldErrorKind {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Raw model output for one split.
struct Predictions {
    test: PredictionFrame,
    train: Option<PredictionFrame>,
}

/// Runs fit/predict for individual splits of one series.
#[derive(Debug, Clone)]
pub struct FoldExecutor<'a> {
    series: &'a TimeSeries,
    include_training_predictions: bool,
    timeout: Option<Duration>,
}

impl<'a> FoldExecutor<'a> {
    pub fn new(series: &'a TimeSeries) -> Self {
        Self {
            series,
            include_training_predictions: false,
            timeout: None,
        }
    }

    pub fn with_training_predictions(mut self, include: bool) -> Self {
        self.include_training_predictions = include;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fit a fresh model from `factory` on the split's training window and
    /// predict its test window.
    pub fn run<F>(&self, split: &SplitSpec, factory: &F) -> Result<FoldResult, FoldError>
    where
        F: Fn() -> Box<dyn Forecaster> + ?Sized,
    {
        let train = self.series.slice(split.train_range())?;
        let test_frame = self.series.future_frame(split.test_range())?;
        let train_frame = if self.include_training_predictions {
            Some(self.series.future_frame(split.train_range())?)
        } else {
            None
        };
        let training_scale = naive_scale(train.values());

        let model = factory();
        debug!(
            "Split {}: fitting {} on {} observations",
            split.split_key,
            model.name(),
            train.len()
        );

        let predictions = match self.timeout {
            None => guarded(|| {
                fit_predict(model.as_ref(), &train, &test_frame, train_frame.as_ref())
            })?,
            Some(timeout) => self.run_with_timeout(
                split,
                model,
                train.clone(),
                test_frame.clone(),
                train_frame.clone(),
                timeout,
            )?,
        };

        let mut rows = Vec::with_capacity(split.test_len() + train.len());
        if let Some(frame) = &predictions.train {
            rows.extend(self.normalize(split, split.train_start_idx, train.len(), frame, true));
        }
        rows.extend(self.normalize(
            split,
            split.test_start_idx,
            test_frame.len(),
            &predictions.test,
            false,
        ));

        Ok(FoldResult {
            split: *split,
            rows,
            training_scale,
        })
    }

    /// Run fit/predict on a detached thread and abandon it past `timeout`.
    fn run_with_timeout(
        &self,
        split: &SplitSpec,
        model: Box<dyn Forecaster>,
        train: TimeSeries,
        test_frame: FutureFrame,
        train_frame: Option<FutureFrame>,
        timeout: Duration,
    ) -> Result<Predictions, FoldError> {
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("split-{}", split.split_key))
            .spawn(move || {
                let outcome = guarded(|| {
                    fit_predict(model.as_ref(), &train, &test_frame, train_frame.as_ref())
                });
                // The receiver is gone once the split timed out.
                let _ = tx.send(outcome);
            })
            .map_err(|e| FoldError::Worker(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(FoldError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FoldError::Panicked(
                "split worker exited without a result".to_string(),
            )),
        }
    }

    /// One row per date of the window, predictions matched by date.
    fn normalize(
        &self,
        split: &SplitSpec,
        start: usize,
        len: usize,
        frame: &PredictionFrame,
        is_training_row: bool,
    ) -> Vec<FoldRow> {
        let by_date: HashMap<NaiveDate, f64> = frame.iter().collect();
        let dates = &self.series.dates()[start..start + len];
        let actuals = &self.series.values()[start..start + len];

        let rows: Vec<FoldRow> = dates
            .iter()
            .zip(actuals)
            .map(|(date, actual)| FoldRow {
                date: *date,
                split_key: split.split_key,
                actual: *actual,
                predicted: by_date.get(date).copied().filter(|p| p.is_finite()),
                is_training_row,
            })
            .collect();

        let missing = rows.iter().filter(|r| r.predicted.is_none()).count();
        if missing > 0 {
            debug!(
                "Split {}: {} of {} {} rows have no usable prediction",
                split.split_key,
                missing,
                rows.len(),
                if is_training_row { "training" } else { "test" }
            );
        }

        rows
    }
}

fn fit_predict(
    model: &dyn Forecaster,
    train: &TimeSeries,
    test_frame: &FutureFrame,
    train_frame: Option<&FutureFrame>,
) -> Result<Predictions, FoldError> {
    let fitted = model.fit(train).map_err(FoldError::Fit)?;
    let test = fitted.predict(test_frame).map_err(FoldError::Predict)?;
    let train = train_frame
        .map(|frame| fitted.predict(frame).map_err(FoldError::Predict))
        .transpose()?;
    Ok(Predictions { test, train })
}

/// Convert a panic inside model code into a split failure.
fn guarded<T>(f: impl FnOnce() -> Result<T, FoldError>) -> Result<T, FoldError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(FoldError::Panicked(panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
