//! Baseline forecasters.
//!
//! Small reference models that satisfy the `Forecaster` contract. They are
//! useful as benchmarks and for exercising the engine end to end.

use statrs::statistics::Statistics;

use crate::data::{FutureFrame, TimeSeries};

use super::{FittedModel, Forecaster, ModelError, PredictionComponent, PredictionFrame};

fn require(train: &TimeSeries, required: usize) -> Result<(), ModelError> {
    if train.len() < required {
        return Err(ModelError::InsufficientData {
            required,
            got: train.len(),
        });
    }
    Ok(())
}

/// Repeats the last training value.
#[derive(Debug, Clone, Default)]
pub struct NaiveForecaster;

struct ConstantFit {
    level: f64,
}

impl FittedModel for ConstantFit {
    fn predict(&self, frame: &FutureFrame) -> Result<PredictionFrame, ModelError> {
        PredictionFrame::new(frame.dates().to_vec(), vec![self.level; frame.len()])
    }
}

impl Forecaster for NaiveForecaster {
    fn name(&self) -> &str {
        "naive"
    }

    fn fit(&self, train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        require(train, 1)?;
        let level = train.values()[train.len() - 1];
        Ok(Box::new(ConstantFit { level }))
    }
}

/// Predicts the training mean.
#[derive(Debug, Clone, Default)]
pub struct MeanForecaster;

impl Forecaster for MeanForecaster {
    fn name(&self) -> &str {
        "mean"
    }

    fn fit(&self, train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        require(train, 1)?;
        let level = train.values().iter().mean();
        if !level.is_finite() {
            return Err(ModelError::Numerical("training mean is not finite".to_string()));
        }
        Ok(Box::new(ConstantFit { level }))
    }
}

/// Repeats the last observed season.
#[derive(Debug, Clone)]
pub struct SeasonalNaiveForecaster {
    period: usize,
}

impl SeasonalNaiveForecaster {
    pub fn new(period: usize) -> Result<Self, ModelError> {
        if period == 0 {
            return Err(ModelError::InvalidParameter(
                "seasonal period must be >= 1".to_string(),
            ));
        }
        Ok(Self { period })
    }
}

struct SeasonalFit {
    season: Vec<f64>,
    /// Absolute position of `season[0]`.
    season_start: usize,
}

impl FittedModel for SeasonalFit {
    fn predict(&self, frame: &FutureFrame) -> Result<PredictionFrame, ModelError> {
        let period = self.season.len() as i64;
        let values: Vec<f64> = frame
            .positions()
            .iter()
            .map(|&p| {
                let phase = (p as i64 - self.season_start as i64).rem_euclid(period);
                self.season[phase as usize]
            })
            .collect();

        PredictionFrame::new(frame.dates().to_vec(), values.clone())?
            .with_component(PredictionComponent::Seasonality, values)
    }
}

impl Forecaster for SeasonalNaiveForecaster {
    fn name(&self) -> &str {
        "seasonal_naive"
    }

    fn fit(&self, train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        require(train, self.period)?;
        let first = train.len() - self.period;
        Ok(Box::new(SeasonalFit {
            season: train.values()[first..].to_vec(),
            season_start: train.offset() + first,
        }))
    }
}

/// Least-squares fit on the time index plus optional regressors.
#[derive(Debug, Clone, Default)]
pub struct LinearTrendForecaster {
    regressors: Vec<String>,
}

impl LinearTrendForecaster {
    pub fn new(regressors: Vec<String>) -> Self {
        Self { regressors }
    }
}

struct LinearFit {
    intercept: f64,
    slope: f64,
    /// Mean position of the training window; positions are centered on it.
    center: f64,
    betas: Vec<(String, f64)>,
}

impl FittedModel for LinearFit {
    fn predict(&self, frame: &FutureFrame) -> Result<PredictionFrame, ModelError> {
        let trend: Vec<f64> = frame
            .positions()
            .iter()
            .map(|&p| self.intercept + self.slope * (p as f64 - self.center))
            .collect();

        let mut regression = vec![0.0; frame.len()];
        for (name, beta) in &self.betas {
            let values = frame
                .regressor(name)
                .ok_or_else(|| ModelError::MissingRegressor(name.clone()))?;
            for (r, x) in regression.iter_mut().zip(values) {
                *r += beta * x;
            }
        }

        let prediction = trend.iter().zip(&regression).map(|(t, r)| t + r).collect();

        let mut out = PredictionFrame::new(frame.dates().to_vec(), prediction)?
            .with_component(PredictionComponent::Trend, trend)?;
        if !self.betas.is_empty() {
            out = out.with_component(PredictionComponent::Regression, regression)?;
        }
        Ok(out)
    }
}

impl Forecaster for LinearTrendForecaster {
    fn name(&self) -> &str {
        "linear_trend"
    }

    fn fit(&self, train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        let k = self.regressors.len();
        require(train, k + 2)?;

        let n = train.len() as f64;
        let center = train.positions().map(|p| p as f64).sum::<f64>() / n;

        let mut columns: Vec<&[f64]> = Vec::with_capacity(k);
        for name in &self.regressors {
            columns.push(
                train
                    .regressor(name)
                    .ok_or_else(|| ModelError::MissingRegressor(name.clone()))?,
            );
        }

        // Design row: [1, t - center, x_1, ..., x_k].
        let dim = k + 2;
        let mut xtx = vec![vec![0.0; dim]; dim];
        let mut xty = vec![0.0; dim];
        let mut row = vec![0.0; dim];

        for (i, (position, y)) in train.positions().zip(train.values()).enumerate() {
            row[0] = 1.0;
            row[1] = position as f64 - center;
            for (j, column) in columns.iter().enumerate() {
                row[j + 2] = column[i];
            }
            for a in 0..dim {
                xty[a] += row[a] * y;
                for b in 0..dim {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }

        let beta = solve(xtx, xty)?;

        Ok(Box::new(LinearFit {
            intercept: beta[0],
            slope: beta[1],
            center,
            betas: self.regressors.iter().cloned().zip(beta[2..].iter().copied()).collect(),
        }))
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ModelError> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);

        if a[pivot][col].abs() < 1e-12 {
            return Err(ModelError::Numerical(
                "singular design matrix (collinear or constant regressors)".to_string(),
            ));
        }

        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_b;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Numerical("non-finite coefficients".to_string()));
    }
    Ok(x)
}
