//! Forecast accuracy metrics.
//!
//! Each metric maps aligned (actual, predicted) sequences to a single value.
//! Percentage-style metrics are returned as fractions (0.05 = 5%).

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricError {
    #[error("No observations to score")]
    Empty,

    #[error("Length mismatch: {actual} actual vs {predicted} predicted")]
    LengthMismatch { actual: usize, predicted: usize },

    #[error("{count} missing predictions")]
    MissingPredictions { count: usize },

    #[error("Division by zero in {0}")]
    DivisionByZero(String),

    #[error("{0} requires the training window scale")]
    MissingTrainingScale(String),

    #[error("Non-finite result")]
    NonFinite,

    #[error("{0}")]
    Custom(String),
}

/// Split-level facts a metric may need beyond the two sequences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricContext {
    pub split_key: usize,
    pub is_training: bool,
    /// Mean squared one-step naive error over the split's training window.
    pub training_scale: Option<f64>,
}

/// A named accuracy metric.
pub trait Metric: Send + Sync {
    fn evaluate(
        &self,
        actual: &[f64],
        predicted: &[f64],
        context: &MetricContext,
    ) -> Result<f64, MetricError>;
}

impl<F> Metric for F
where
    F: Fn(&[f64], &[f64]) -> Result<f64, MetricError> + Send + Sync,
{
    fn evaluate(
        &self,
        actual: &[f64],
        predicted: &[f64],
        _context: &MetricContext,
    ) -> Result<f64, MetricError> {
        self(actual, predicted)
    }
}

/// Metrics shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinMetric {
    Mae,
    Mse,
    Rmse,
    Mape,
    Smape,
    Wmape,
    Rmsse,
}

impl BuiltinMetric {
    pub const ALL: [BuiltinMetric; 7] = [
        Self::Mae,
        Self::Mse,
        Self::Rmse,
        Self::Mape,
        Self::Smape,
        Self::Wmape,
        Self::Rmsse,
    ];

    /// Metrics scored when none are configured.
    pub fn defaults() -> Vec<BuiltinMetric> {
        vec![
            Self::Smape,
            Self::Wmape,
            Self::Mape,
            Self::Mse,
            Self::Mae,
            Self::Rmsse,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mae => "mae",
            Self::Mse => "mse",
            Self::Rmse => "rmse",
            Self::Mape => "mape",
            Self::Smape => "smape",
            Self::Wmape => "wmape",
            Self::Rmsse => "rmsse",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl Metric for BuiltinMetric {
    fn evaluate(
        &self,
        actual: &[f64],
        predicted: &[f64],
        context: &MetricContext,
    ) -> Result<f64, MetricError> {
        match self {
            Self::Mae => mae(actual, predicted),
            Self::Mse => mse(actual, predicted),
            Self::Rmse => rmse(actual, predicted),
            Self::Mape => mape(actual, predicted),
            Self::Smape => smape(actual, predicted),
            Self::Wmape => wmape(actual, predicted),
            Self::Rmsse => rmsse(actual, predicted, context.training_scale),
        }
    }
}

fn check_inputs(actual: &[f64], predicted: &[f64]) -> Result<(), MetricError> {
    if actual.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(())
}

fn finite(value: f64) -> Result<f64, MetricError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricError::NonFinite)
    }
}

fn errors<'a>(actual: &'a [f64], predicted: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    actual.iter().zip(predicted).map(|(a, p)| a - p)
}

/// Mean absolute error.
pub fn mae(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let abs: Vec<f64> = errors(actual, predicted).map(f64::abs).collect();
    finite(abs.iter().mean())
}

/// Mean squared error.
pub fn mse(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let squared: Vec<f64> = errors(actual, predicted).map(|e| e * e).collect();
    finite(squared.iter().mean())
}

/// Root mean squared error.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    Ok(mse(actual, predicted)?.sqrt())
}

/// Mean absolute percentage error. Undefined when any actual is zero.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    if actual.iter().any(|a| *a == 0.0) {
        return Err(MetricError::DivisionByZero("mape".to_string()));
    }
    let ratios: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    finite(ratios.iter().mean())
}

/// Symmetric mean absolute percentage error, in [0, 2].
///
/// Terms where both actual and prediction are zero count as exact.
pub fn smape(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let terms: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| {
            let denom = a.abs() + p.abs();
            if denom == 0.0 {
                0.0
            } else {
                2.0 * (a - p).abs() / denom
            }
        })
        .collect();
    finite(terms.iter().mean())
}

/// Weighted MAPE: total absolute error over total absolute actual.
pub fn wmape(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let scale: f64 = actual.iter().map(|a| a.abs()).sum();
    if scale == 0.0 {
        return Err(MetricError::DivisionByZero("wmape".to_string()));
    }
    let total: f64 = errors(actual, predicted).map(f64::abs).sum();
    finite(total / scale)
}

/// Root mean squared scaled error against the in-sample naive forecast.
pub fn rmsse(
    actual: &[f64],
    predicted: &[f64],
    training_scale: Option<f64>,
) -> Result<f64, MetricError> {
    let scale = training_scale.ok_or_else(|| MetricError::MissingTrainingScale("rmsse".to_string()))?;
    if scale == 0.0 {
        return Err(MetricError::DivisionByZero("rmsse".to_string()));
    }
    finite((mse(actual, predicted)? / scale).sqrt())
}

/// Mean squared one-step naive error of a training window, the RMSSE scale.
/// `None` for fewer than two observations.
pub fn naive_scale(train: &[f64]) -> Option<f64> {
    if train.len() < 2 {
        return None;
    }
    let diffs: Vec<f64> = train.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();
    let scale = diffs.iter().mean();
    scale.is_finite().then_some(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{} != {}", a, b);
    }

    const CTX: MetricContext = MetricContext {
        split_key: 0,
        is_training: false,
        training_scale: Some(4.0),
    };

    #[test]
    fn test_mae_single_row() {
        assert_close(mae(&[10.0], &[7.5]).unwrap(), 2.5);
    }

    #[test]
    fn test_basic_errors() {
        let actual = [1.0, 2.0, 3.0, 4.0];
        let predicted = [1.0, 3.0, 1.0, 4.0];
        assert_close(mae(&actual, &predicted).unwrap(), 0.75);
        assert_close(mse(&actual, &predicted).unwrap(), 1.25);
        assert_close(rmse(&actual, &predicted).unwrap(), 1.25_f64.sqrt());
        assert_close(wmape(&actual, &predicted).unwrap(), 0.3);
        assert_close(
            mape(&actual, &predicted).unwrap(),
            (0.0 + 0.5 + 2.0 / 3.0 + 0.0) / 4.0,
        );
    }

    #[test]
    fn test_smape_zero_terms() {
        assert_close(smape(&[0.0, 2.0], &[0.0, 2.0]).unwrap(), 0.0);
        assert_close(smape(&[1.0], &[3.0]).unwrap(), 1.0);
    }

    #[test]
    fn test_mape_zero_actual() {
        assert_eq!(
            mape(&[0.0, 1.0], &[1.0, 1.0]),
            Err(MetricError::DivisionByZero("mape".to_string()))
        );
        assert!(matches!(
            wmape(&[0.0], &[1.0]),
            Err(MetricError::DivisionByZero(_))
        ));
    }

    #[test]
    fn test_input_checks() {
        assert_eq!(mae(&[], &[]), Err(MetricError::Empty));
        assert_eq!(
            mse(&[1.0], &[1.0, 2.0]),
            Err(MetricError::LengthMismatch {
                actual: 1,
                predicted: 2
            })
        );
        assert_eq!(mae(&[f64::INFINITY], &[1.0]), Err(MetricError::NonFinite));
    }

    #[test]
    fn test_rmsse_uses_training_scale() {
        let value = BuiltinMetric::Rmsse.evaluate(&[3.0, 5.0], &[1.0, 3.0], &CTX).unwrap();
        assert_close(value, 1.0);

        let no_scale = MetricContext {
            training_scale: None,
            ..CTX
        };
        assert!(matches!(
            BuiltinMetric::Rmsse.evaluate(&[1.0], &[1.0], &no_scale),
            Err(MetricError::MissingTrainingScale(_))
        ));
    }

    #[test]
    fn test_naive_scale() {
        assert_eq!(naive_scale(&[1.0]), None);
        assert_close(naive_scale(&[1.0, 3.0, 2.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_closure_metric() {
        let max_error = |a: &[f64], p: &[f64]| -> Result<f64, MetricError> {
            errors(a, p)
                .map(f64::abs)
                .reduce(f64::max)
                .ok_or(MetricError::Empty)
        };
        assert_close(max_error.evaluate(&[1.0, 5.0], &[2.0, 2.0], &CTX).unwrap(), 3.0);
    }

    #[test]
    fn test_builtin_names() {
        for metric in BuiltinMetric::ALL {
            assert_eq!(BuiltinMetric::from_str(metric.as_str()), Some(metric));
        }
        assert_eq!(BuiltinMetric::from_str("SMAPE"), Some(BuiltinMetric::Smape));
        assert_eq!(BuiltinMetric::from_str("r2"), None);
        assert_eq!(BuiltinMetric::defaults().len(), 6);
    }
}
