//! Run configuration.
//!
//! `BacktestConfig` holds the windowing and execution options; `RunConfig`
//! is the TOML run file the binary reads (`[backtest]`, `[model]`,
//! `[scoring]` and a top-level `metrics` list).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::{BuiltinMetric, MetricSet, ScoringConfig};
use crate::model::ModelKind;
use crate::split::{SplitError, SplitSchemeConfig, WindowType};

use super::engine::BacktestError;

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestConfig {
    /// Observations in the first training window. Ignored when `n_splits` is set.
    pub min_train_size: usize,

    /// Observations predicted and scored per split.
    pub forecast_horizon: usize,

    /// Observations the training end advances per split.
    pub incremental_step: usize,

    /// Expanding or rolling training window.
    pub window_type: WindowType,

    /// Training span for rolling windows.
    pub window_size: Option<usize>,

    /// Derive `min_train_size` so exactly this many splits end at the last observation.
    pub n_splits: Option<usize>,

    /// Also predict (and report) the training window of every split.
    pub include_training_predictions: bool,

    /// Stop dispatching splits after the first failure and return it as an error.
    pub fail_fast: bool,

    /// Wall-clock budget for fit + predict of one split.
    pub per_split_timeout_ms: Option<u64>,

    /// Worker threads. `None` uses the global pool, `Some(1)` runs sequentially.
    pub max_workers: Option<usize>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        let scheme = SplitSchemeConfig::default();
        Self {
            min_train_size: scheme.min_train_size,
            forecast_horizon: scheme.forecast_horizon,
            incremental_step: scheme.incremental_step,
            window_type: scheme.window_type,
            window_size: scheme.window_size,
            n_splits: None,
            include_training_predictions: false,
            fail_fast: false,
            per_split_timeout_ms: None,
            max_workers: None,
        }
    }
}

impl BacktestConfig {
    /// Check every option that does not depend on the series.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if let Some(n_splits) = self.n_splits {
            if n_splits == 0 {
                return Err(SplitError::NonPositive {
                    field: "n_splits",
                    value: 0,
                }
                .into());
            }
            // min_train_size is derived later; check the rest with a placeholder.
            SplitSchemeConfig {
                min_train_size: 1,
                ..self.explicit_scheme()
            }
            .validate()?;
        } else {
            self.explicit_scheme().validate()?;
        }

        if self.max_workers == Some(0) {
            return Err(BacktestError::Configuration(
                "max_workers must be >= 1".to_string(),
            ));
        }
        if self.per_split_timeout_ms == Some(0) {
            return Err(BacktestError::Configuration(
                "per_split_timeout_ms must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn per_split_timeout(&self) -> Option<Duration> {
        self.per_split_timeout_ms.map(Duration::from_millis)
    }

    /// Windowing parameters for a series of `series_length` observations.
    pub fn scheme_config(&self, series_length: usize) -> Result<SplitSchemeConfig, SplitError> {
        match self.n_splits {
            Some(n_splits) => SplitSchemeConfig::from_n_splits(
                series_length,
                n_splits,
                self.forecast_horizon,
                self.incremental_step,
                self.window_type,
                self.window_size,
            ),
            None => {
                let config = self.explicit_scheme();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn explicit_scheme(&self) -> SplitSchemeConfig {
        SplitSchemeConfig {
            min_train_size: self.min_train_size,
            forecast_horizon: self.forecast_horizon,
            incremental_step: self.incremental_step,
            window_type: self.window_type,
            window_size: self.window_size,
        }
    }
}

/// Contents of a TOML run file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub backtest: BacktestConfig,

    #[serde(default)]
    pub model: ModelKind,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default = "BuiltinMetric::defaults")]
    pub metrics: Vec<BuiltinMetric>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestConfig::default(),
            model: ModelKind::default(),
            scoring: ScoringConfig::default(),
            metrics: BuiltinMetric::defaults(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, BacktestError> {
        let config: Self =
            toml::from_str(s).map_err(|e| BacktestError::Configuration(e.to_string()))?;
        config.backtest.validate()?;
        config.model.validate()?;
        Ok(config)
    }

    pub fn metric_set(&self) -> MetricSet {
        MetricSet::builtin(&self.metrics)
    }
}
