//! Model selection by configuration.

use serde::{Deserialize, Serialize};

use super::baseline::{
    LinearTrendForecaster, MeanForecaster, NaiveForecaster, SeasonalNaiveForecaster,
};
use super::{Forecaster, ModelError};

/// Which baseline model to build for each split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Naive,
    Mean,
    SeasonalNaive {
        period: usize,
    },
    LinearTrend {
        #[serde(default)]
        regressors: Vec<String>,
    },
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Mean => "mean",
            Self::SeasonalNaive { .. } => "seasonal_naive",
            Self::LinearTrend { .. } => "linear_trend",
        }
    }

    /// Regressor columns the model reads from the series.
    pub fn regressors(&self) -> &[String] {
        match self {
            Self::LinearTrend { regressors } => regressors,
            _ => &[],
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if let Self::SeasonalNaive { period } = self {
            SeasonalNaiveForecaster::new(*period)?;
        }
        Ok(())
    }

    /// Build a fresh, unfitted model.
    pub fn build(&self) -> Result<Box<dyn Forecaster>, ModelError> {
        Ok(match self {
            Self::Naive => Box::new(NaiveForecaster),
            Self::Mean => Box::new(MeanForecaster),
            Self::SeasonalNaive { period } => Box::new(SeasonalNaiveForecaster::new(*period)?),
            Self::LinearTrend { regressors } => {
                Box::new(LinearTrendForecaster::new(regressors.clone()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tagged() {
        let kind: ModelKind = toml::from_str("kind = \"seasonal_naive\"\nperiod = 7\n").unwrap();
        assert_eq!(kind, ModelKind::SeasonalNaive { period: 7 });

        let kind: ModelKind = toml::from_str("kind = \"linear_trend\"\n").unwrap();
        assert_eq!(kind, ModelKind::LinearTrend { regressors: vec![] });
    }

    #[test]
    fn test_build_names_match() {
        let kinds = [
            ModelKind::Naive,
            ModelKind::Mean,
            ModelKind::SeasonalNaive { period: 4 },
            ModelKind::LinearTrend {
                regressors: vec!["x".to_string()],
            },
        ];
        for kind in kinds {
            assert!(kind.validate().is_ok());
            assert_eq!(kind.build().unwrap().name(), kind.name());
        }
    }

    #[test]
    fn test_invalid_period() {
        let kind = ModelKind::SeasonalNaive { period: 0 };
        assert!(kind.validate().is_err());
        assert!(kind.build().is_err());
    }
}
