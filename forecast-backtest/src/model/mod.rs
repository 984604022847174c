//! Forecasting model interface.
//!
//! The engine drives any model through two capabilities:
//! - `Forecaster::fit` consumes a training series and returns a fitted model
//! - `FittedModel::predict` maps future dates (and regressors) to predictions
//!
//! Baseline variants live in `baseline` and are selected through `ModelKind`.

pub mod baseline;
pub mod kind;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{FutureFrame, TimeSeries};

pub use baseline::{LinearTrendForecaster, MeanForecaster, NaiveForecaster, SeasonalNaiveForecaster};
pub use kind::ModelKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Insufficient training data: need {required} observations, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Missing regressor column '{0}'")]
    MissingRegressor(String),

    #[error("Invalid model parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Prediction frame mismatch: {0}")]
    FrameMismatch(String),

    #[error("{0}")]
    Other(String),
}

/// An unfitted model. A fresh instance is built for every split.
pub trait Forecaster: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Fit on the training window.
    fn fit(&self, train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// A model fitted on one split's training window.
pub trait FittedModel: Send {
    /// Predict for the dates in `frame`.
    fn predict(&self, frame: &FutureFrame) -> Result<PredictionFrame, ModelError>;
}

/// Decomposed parts a model may report next to its prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionComponent {
    Trend,
    Seasonality,
    Regression,
}

impl PredictionComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Seasonality => "seasonality",
            Self::Regression => "regression",
        }
    }
}

/// Model output: one prediction per date plus optional components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionFrame {
    dates: Vec<NaiveDate>,
    prediction: Vec<f64>,
    components: BTreeMap<PredictionComponent, Vec<f64>>,
}

impl PredictionFrame {
    pub fn new(dates: Vec<NaiveDate>, prediction: Vec<f64>) -> Result<Self, ModelError> {
        if dates.len() != prediction.len() {
            return Err(ModelError::FrameMismatch(format!(
                "{} dates but {} predictions",
                dates.len(),
                prediction.len()
            )));
        }
        Ok(Self {
            dates,
            prediction,
            components: BTreeMap::new(),
        })
    }

    pub fn with_component(
        mut self,
        component: PredictionComponent,
        values: Vec<f64>,
    ) -> Result<Self, ModelError> {
        if values.len() != self.dates.len() {
            return Err(ModelError::FrameMismatch(format!(
                "{} component has {} values for {} dates",
                component.as_str(),
                values.len(),
                self.dates.len()
            )));
        }
        self.components.insert(component, values);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn prediction(&self) -> &[f64] {
        &self.prediction
    }

    pub fn component(&self, component: PredictionComponent) -> Option<&[f64]> {
        self.components.get(&component).map(|v| v.as_slice())
    }

    pub fn components(&self) -> impl Iterator<Item = PredictionComponent> + '_ {
        self.components.keys().copied()
    }

    /// (date, prediction) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.prediction.iter().copied())
    }
}
