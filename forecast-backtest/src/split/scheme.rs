//! Train/test split generation.
//!
//! Generates positional train/test windows over a series under an expanding
//! or rolling policy.

use std::fmt::Write as _;
use std::ops::RangeInclusive;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("{field} must be >= 1, got {value}")]
    NonPositive { field: &'static str, value: usize },

    #[error("Rolling window requires window_size")]
    MissingWindowSize,

    #[error("window_size ({window_size}) must be >= min_train_size ({min_train_size})")]
    WindowTooSmall {
        window_size: usize,
        min_train_size: usize,
    },

    #[error(
        "{n_splits} splits of horizon {forecast_horizon} with step {incremental_step} \
         do not fit in a series of length {series_length}"
    )]
    TooManySplits {
        n_splits: usize,
        forecast_horizon: usize,
        incremental_step: usize,
        series_length: usize,
    },
}

/// Training window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    /// Training window starts at the first observation and grows each split.
    #[default]
    Expanding,
    /// Training window keeps a fixed span and slides forward each split.
    Rolling,
}

impl WindowType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "expanding" => Some(Self::Expanding),
            "rolling" => Some(Self::Rolling),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expanding => "expanding",
            Self::Rolling => "rolling",
        }
    }
}

/// A single train/test partition, as inclusive offsets into the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitSpec {
    /// Ordinal of the split (0-indexed, increasing with time).
    pub split_key: usize,
    /// First training observation.
    pub train_start_idx: usize,
    /// Last training observation.
    pub train_end_idx: usize,
    /// First test observation, always `train_end_idx + 1`.
    pub test_start_idx: usize,
    /// Last test observation.
    pub test_end_idx: usize,
}

impl SplitSpec {
    pub fn train_range(&self) -> RangeInclusive<usize> {
        self.train_start_idx..=self.train_end_idx
    }

    pub fn test_range(&self) -> RangeInclusive<usize> {
        self.test_start_idx..=self.test_end_idx
    }

    /// Number of training observations.
    pub fn train_len(&self) -> usize {
        self.train_end_idx - self.train_start_idx + 1
    }

    /// Number of test observations.
    pub fn test_len(&self) -> usize {
        self.test_end_idx - self.test_start_idx + 1
    }
}

/// Configuration for split generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSchemeConfig {
    /// Observations in the first training window.
    pub min_train_size: usize,
    /// Observations predicted and scored per split.
    pub forecast_horizon: usize,
    /// Advance the training end by this many observations per split.
    pub incremental_step: usize,
    /// Training window policy.
    pub window_type: WindowType,
    /// Training span for rolling windows.
    pub window_size: Option<usize>,
}

impl Default for SplitSchemeConfig {
    fn default() -> Self {
        Self {
            min_train_size: 30,
            forecast_horizon: 7,
            incremental_step: 7,
            window_type: WindowType::Expanding,
            window_size: None,
        }
    }
}

impl SplitSchemeConfig {
    /// Configuration yielding exactly `n_splits` splits whose last test
    /// window ends at the last observation.
    pub fn from_n_splits(
        series_length: usize,
        n_splits: usize,
        forecast_horizon: usize,
        incremental_step: usize,
        window_type: WindowType,
        window_size: Option<usize>,
    ) -> Result<Self, SplitError> {
        check_positive("n_splits", n_splits)?;
        check_positive("forecast_horizon", forecast_horizon)?;
        check_positive("incremental_step", incremental_step)?;

        let too_many = || SplitError::TooManySplits {
            n_splits,
            forecast_horizon,
            incremental_step,
            series_length,
        };

        let span = (n_splits - 1)
            .checked_mul(incremental_step)
            .and_then(|s| s.checked_add(forecast_horizon))
            .ok_or_else(too_many)?;
        let min_train_size = series_length.checked_sub(span).filter(|&m| m >= 1).ok_or_else(too_many)?;

        let config = Self {
            min_train_size,
            forecast_horizon,
            incremental_step,
            window_type,
            window_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check windowing preconditions.
    pub fn validate(&self) -> Result<(), SplitError> {
        check_positive("min_train_size", self.min_train_size)?;
        check_positive("forecast_horizon", self.forecast_horizon)?;
        check_positive("incremental_step", self.incremental_step)?;

        if self.window_type == WindowType::Rolling {
            let window_size = self.window_size.ok_or(SplitError::MissingWindowSize)?;
            if window_size < self.min_train_size {
                return Err(SplitError::WindowTooSmall {
                    window_size,
                    min_train_size: self.min_train_size,
                });
            }
        }

        Ok(())
    }
}

fn check_positive(field: &'static str, value: usize) -> Result<(), SplitError> {
    if value == 0 {
        return Err(SplitError::NonPositive { field, value });
    }
    Ok(())
}

/// Generator for train/test splits over a series of known length.
#[derive(Debug, Clone)]
pub struct SplitScheme {
    config: SplitSchemeConfig,
    series_length: usize,
}

impl SplitScheme {
    /// Create a split generator, validating the configuration.
    pub fn new(config: SplitSchemeConfig, series_length: usize) -> Result<Self, SplitError> {
        config.validate()?;
        Ok(Self {
            config,
            series_length,
        })
    }

    pub fn config(&self) -> &SplitSchemeConfig {
        &self.config
    }

    pub fn series_length(&self) -> usize {
        self.series_length
    }

    /// Generate all splits in time order. Empty when the series is too short.
    pub fn generate(&self) -> Vec<SplitSpec> {
        let cfg = &self.config;
        let mut splits = Vec::new();
        let mut train_end_idx = cfg.min_train_size - 1;

        loop {
            let test_end_idx = match train_end_idx.checked_add(cfg.forecast_horizon) {
                Some(end) if end < self.series_length => end,
                _ => break,
            };
            let test_start_idx = train_end_idx + 1;

            let train_start_idx = match (cfg.window_type, cfg.window_size) {
                (WindowType::Rolling, Some(window_size)) => {
                    (train_end_idx + 1).saturating_sub(window_size)
                }
                _ => 0,
            };

            splits.push(SplitSpec {
                split_key: splits.len(),
                train_start_idx,
                train_end_idx,
                test_start_idx,
                test_end_idx,
            });

            train_end_idx = match train_end_idx.checked_add(cfg.incremental_step) {
                Some(next) => next,
                None => break,
            };
        }

        splits
    }

    /// Number of splits `generate` will produce.
    pub fn expected_splits(&self) -> usize {
        let cfg = &self.config;
        let required = cfg.min_train_size.saturating_add(cfg.forecast_horizon);

        if self.series_length < required {
            return 0;
        }

        (self.series_length - required) / cfg.incremental_step + 1
    }

    /// Human-readable listing of every split. Date ranges are included when
    /// `dates` covers the series.
    pub fn describe(&self, dates: Option<&[NaiveDate]>) -> String {
        let splits = self.generate();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Split scheme: {} window, {} splits over {} observations",
            self.config.window_type.as_str(),
            splits.len(),
            self.series_length
        );
        let _ = writeln!(
            out,
            "  min_train_size={}, forecast_horizon={}, incremental_step={}{}",
            self.config.min_train_size,
            self.config.forecast_horizon,
            self.config.incremental_step,
            self.config
                .window_size
                .map(|w| format!(", window_size={}", w))
                .unwrap_or_default()
        );

        let dates = dates.filter(|d| d.len() >= self.series_length);

        for split in &splits {
            let _ = write!(
                out,
                "  [{}] train {:>5}..={:<5} test {:>5}..={:<5}",
                split.split_key,
                split.train_start_idx,
                split.train_end_idx,
                split.test_start_idx,
                split.test_end_idx
            );
            if let Some(dates) = dates {
                let _ = write!(
                    out,
                    "  ({} to {} | {} to {})",
                    dates[split.train_start_idx],
                    dates[split.train_end_idx],
                    dates[split.test_start_idx],
                    dates[split.test_end_idx]
                );
            }
            out.push('\n');
        }

        out
    }
}

/// Generate splits from raw windowing parameters.
pub fn generate(
    series_length: usize,
    min_train_size: usize,
    forecast_horizon: usize,
    incremental_step: usize,
    window_type: WindowType,
    window_size: Option<usize>,
) -> Result<Vec<SplitSpec>, SplitError> {
    let config = SplitSchemeConfig {
        min_train_size,
        forecast_horizon,
        incremental_step,
        window_type,
        window_size,
    };
    Ok(SplitScheme::new(config, series_length)?.generate())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(splits: &[SplitSpec]) -> (Vec<(usize, usize)>, Vec<(usize, usize)>) {
        (
            splits.iter().map(|s| (s.train_start_idx, s.train_end_idx)).collect(),
            splits.iter().map(|s| (s.test_start_idx, s.test_end_idx)).collect(),
        )
    }

    #[test]
    fn test_expanding_scenario() {
        let splits = generate(100, 80, 5, 5, WindowType::Expanding, None).unwrap();
        assert_eq!(splits.len(), 4);

        let (train, test) = ranges(&splits);
        assert_eq!(train, vec![(0, 79), (0, 84), (0, 89), (0, 94)]);
        assert_eq!(test, vec![(80, 84), (85, 89), (90, 94), (95, 99)]);
    }

    #[test]
    fn test_rolling_scenario() {
        let splits = generate(100, 80, 5, 5, WindowType::Rolling, Some(80)).unwrap();

        let (train, _) = ranges(&splits);
        assert_eq!(train, vec![(0, 79), (5, 84), (10, 89), (15, 94)]);
        assert!(splits.iter().all(|s| s.train_len() == 80));
    }

    #[test]
    fn test_rolling_window_fills_before_sliding() {
        let splits = generate(40, 10, 5, 5, WindowType::Rolling, Some(20)).unwrap();

        assert_eq!(splits[0].train_start_idx, 0);
        assert_eq!(splits[0].train_len(), 10);
        assert_eq!(splits[1].train_len(), 15);
        for split in splits.iter().skip(2) {
            assert_eq!(split.train_len(), 20);
        }
    }

    #[test]
    fn test_too_short_yields_no_splits() {
        let splits = generate(10, 8, 5, 1, WindowType::Expanding, None).unwrap();
        assert!(splits.is_empty());

        let scheme = SplitScheme::new(
            SplitSchemeConfig {
                min_train_size: 8,
                forecast_horizon: 5,
                incremental_step: 1,
                ..Default::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(scheme.expected_splits(), 0);
    }

    #[test]
    fn test_huge_parameters_do_not_overflow() {
        let splits = generate(100, 5, usize::MAX, 1, WindowType::Expanding, None).unwrap();
        assert!(splits.is_empty());

        // One split fits; the next step would run past usize::MAX.
        let splits = generate(100, 80, 5, usize::MAX, WindowType::Expanding, None).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].test_range(), 80..=84);

        let scheme = SplitScheme::new(
            SplitSchemeConfig {
                min_train_size: 5,
                forecast_horizon: usize::MAX,
                incremental_step: 1,
                ..Default::default()
            },
            100,
        )
        .unwrap();
        assert_eq!(scheme.expected_splits(), 0);
        assert!(scheme.generate().is_empty());
    }

    #[test]
    fn test_split_invariants() {
        for step in 1..=6 {
            let splits = generate(57, 11, 4, step, WindowType::Expanding, None).unwrap();
            assert!(!splits.is_empty());

            for split in &splits {
                assert_eq!(split.test_start_idx, split.train_end_idx + 1);
                assert_eq!(split.test_len(), 4);
                assert_eq!(split.train_start_idx, 0);
                assert!(split.test_end_idx < 57);
            }

            for pair in splits.windows(2) {
                assert!(pair[1].split_key > pair[0].split_key);
                assert!(pair[1].test_start_idx > pair[0].test_start_idx);
                // Overlapping or adjacent, never skipping a date.
                if step <= 4 {
                    assert!(pair[1].test_start_idx <= pair[0].test_end_idx + 1);
                }
            }

            let scheme = SplitScheme::new(
                SplitSchemeConfig {
                    min_train_size: 11,
                    forecast_horizon: 4,
                    incremental_step: step,
                    ..Default::default()
                },
                57,
            )
            .unwrap();
            assert_eq!(scheme.expected_splits(), splits.len());
        }
    }

    #[test]
    fn test_step_equal_to_horizon_is_contiguous() {
        let splits = generate(60, 20, 10, 10, WindowType::Expanding, None).unwrap();
        for pair in splits.windows(2) {
            assert_eq!(pair[1].test_start_idx, pair[0].test_end_idx + 1);
        }
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            generate(100, 0, 5, 5, WindowType::Expanding, None),
            Err(SplitError::NonPositive {
                field: "min_train_size",
                value: 0
            })
        );
        assert!(matches!(
            generate(100, 10, 0, 5, WindowType::Expanding, None),
            Err(SplitError::NonPositive { field: "forecast_horizon", .. })
        ));
        assert!(matches!(
            generate(100, 10, 5, 0, WindowType::Expanding, None),
            Err(SplitError::NonPositive { field: "incremental_step", .. })
        ));
        assert_eq!(
            generate(100, 10, 5, 5, WindowType::Rolling, None),
            Err(SplitError::MissingWindowSize)
        );
        assert!(matches!(
            generate(100, 10, 5, 5, WindowType::Rolling, Some(9)),
            Err(SplitError::WindowTooSmall { .. })
        ));
    }

    #[test]
    fn test_from_n_splits() {
        let config =
            SplitSchemeConfig::from_n_splits(100, 4, 5, 5, WindowType::Expanding, None).unwrap();
        assert_eq!(config.min_train_size, 80);

        let splits = SplitScheme::new(config, 100).unwrap().generate();
        assert_eq!(splits.len(), 4);
        assert_eq!(splits.last().unwrap().test_end_idx, 99);

        assert!(matches!(
            SplitSchemeConfig::from_n_splits(10, 5, 3, 2, WindowType::Expanding, None),
            Err(SplitError::TooManySplits { .. })
        ));
    }

    #[test]
    fn test_window_type_names() {
        assert_eq!(WindowType::from_str("Rolling"), Some(WindowType::Rolling));
        assert_eq!(WindowType::from_str("sliding"), None);
        assert_eq!(WindowType::Expanding.as_str(), "expanding");
    }

    #[test]
    fn test_describe_lists_every_split() {
        let scheme = SplitScheme::new(
            SplitSchemeConfig {
                min_train_size: 8,
                forecast_horizon: 2,
                incremental_step: 2,
                ..Default::default()
            },
            12,
        )
        .unwrap();

        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        let dates: Vec<_> = (0..12).map(|i| start + chrono::Duration::days(i)).collect();
        let text = scheme.describe(Some(&dates));

        assert!(text.contains("2 splits over 12 observations"));
        assert!(text.contains("[1]"));
        assert!(text.contains("2021-03-11"));
    }
}
