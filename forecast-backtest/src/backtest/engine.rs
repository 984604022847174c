//! Backtest driver.
//!
//! Runs the split loop:
//! 1. Validate configuration and plan splits for the series
//! 2. Fan splits out over a rayon pool, one fresh model per split
//! 3. Record successes, failures and skipped splits
//! 4. Fan results into the aggregator and build the report

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::{Spacing, TimeSeries};
use crate::model::{FittedModel, Forecaster, ModelError, ModelKind};
use crate::report::BacktestReport;
use crate::split::{SplitError, SplitScheme, SplitSpec};

use super::aggregator::ResultAggregator;
use super::config::BacktestConfig;
use super::fold::{FoldError, FoldExecutor, FoldResult, SplitFailure};

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid split scheme: {0}")]
    InvalidSplitScheme(#[from] SplitError),

    #[error(
        "Insufficient data: series of length {series_length} needs at least \
         {required} observations for one split"
    )]
    InsufficientData { series_length: usize, required: usize },

    #[error("Split {split_key} failed: {source}")]
    SplitFailed {
        split_key: usize,
        #[source]
        source: FoldError,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid model: {0}")]
    InvalidModel(#[from] ModelError),
}

pub type BacktestResult<T> = Result<T, BacktestError>;

/// Shared flag checked before each split starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a planned split never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cancelled,
    /// An earlier failure stopped dispatch under `fail_fast`.
    Aborted,
}

#[derive(Debug)]
enum SplitOutcome {
    Completed(FoldResult),
    Failed(SplitFailure),
    Skipped(SplitSpec, SkipReason),
}

/// Called with (finished, total) after every split.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Walk-forward backtest over one series.
pub struct BacktestEngine {
    config: BacktestConfig,
    cancellation: CancellationToken,
    progress: Option<ProgressFn>,
}

impl BacktestEngine {
    /// Create an engine, rejecting invalid configuration up front.
    pub fn new(config: BacktestConfig) -> BacktestResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancellation: CancellationToken::new(),
            progress: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Split scheme for a series of `series_length` observations.
    pub fn scheme(&self, series_length: usize) -> BacktestResult<SplitScheme> {
        let scheme_config = self.config.scheme_config(series_length)?;
        Ok(SplitScheme::new(scheme_config, series_length)?)
    }

    /// Planned splits. Zero splits is an error at this level.
    pub fn plan(&self, series_length: usize) -> BacktestResult<Vec<SplitSpec>> {
        let scheme = self.scheme(series_length)?;
        let splits = scheme.generate();
        if splits.is_empty() {
            let cfg = scheme.config();
            return Err(BacktestError::InsufficientData {
                series_length,
                required: cfg.min_train_size.saturating_add(cfg.forecast_horizon),
            });
        }
        Ok(splits)
    }

    /// Run a configured baseline model.
    pub fn run_kind(
        &self,
        series: &TimeSeries,
        kind: &ModelKind,
    ) -> BacktestResult<BacktestReport> {
        kind.validate()?;
        if let Some(missing) = kind
            .regressors()
            .iter()
            .find(|name| series.regressor(name).is_none())
        {
            return Err(BacktestError::Configuration(format!(
                "model {} needs regressor '{}' which the series does not have",
                kind.name(),
                missing
            )));
        }

        let factory = || -> Box<dyn Forecaster> {
            kind.build()
                .unwrap_or_else(|e| Box::new(InvalidForecaster(e)) as Box<dyn Forecaster>)
        };
        self.run(series, factory)
    }

    /// Run the backtest with a fresh model from `factory` for every split.
    pub fn run<F>(&self, series: &TimeSeries, factory: F) -> BacktestResult<BacktestReport>
    where
        F: Fn() -> Box<dyn Forecaster> + Sync,
    {
        let splits = self.plan(series.len())?;
        info!(
            "Generated {} splits over {} observations ({} window)",
            splits.len(),
            series.len(),
            self.config.window_type.as_str()
        );

        if let Spacing::Irregular { min_days, max_days } = series.spacing() {
            warn!(
                "Irregular date spacing ({} to {} days); splits are positional",
                min_days, max_days
            );
        }

        let outcomes = match self.config.max_workers {
            Some(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("backtest-{}", i))
                    .build()?;
                pool.install(|| self.execute(series, &splits, &factory))
            }
            None => self.execute(series, &splits, &factory),
        };

        self.collect(splits, outcomes)
    }

    fn execute<F>(
        &self,
        series: &TimeSeries,
        splits: &[SplitSpec],
        factory: &F,
    ) -> Vec<SplitOutcome>
    where
        F: Fn() -> Box<dyn Forecaster> + Sync,
    {
        let executor = FoldExecutor::new(series)
            .with_training_predictions(self.config.include_training_predictions)
            .with_timeout(self.config.per_split_timeout());
        let aborted = AtomicBool::new(false);
        let progress = AtomicUsize::new(0);
        let total = splits.len();

        splits
            .par_iter()
            .map(|split| {
                if self.cancellation.is_cancelled() {
                    return SplitOutcome::Skipped(*split, SkipReason::Cancelled);
                }
                if aborted.load(Ordering::SeqCst) {
                    return SplitOutcome::Skipped(*split, SkipReason::Aborted);
                }

                let outcome = match executor.run(split, factory) {
                    Ok(result) => {
                        debug!("Split {} complete: {} rows", split.split_key, result.rows.len());
                        SplitOutcome::Completed(result)
                    }
                    Err(error) => {
                        warn!(
                            "Split {} failed ({}): {}",
                            split.split_key,
                            error.kind().as_str(),
                            error
                        );
                        if self.config.fail_fast {
                            aborted.store(true, Ordering::SeqCst);
                        }
                        SplitOutcome::Failed(SplitFailure {
                            split: *split,
                            error,
                        })
                    }
                };

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % (total / 10).max(1) == 0 || done == total {
                    info!(
                        "Progress: {:.0}% ({}/{} splits)",
                        done as f64 / total as f64 * 100.0,
                        done,
                        total
                    );
                }
                if let Some(callback) = &self.progress {
                    callback(done, total);
                }

                outcome
            })
            .collect()
    }

    fn collect(
        &self,
        splits: Vec<SplitSpec>,
        outcomes: Vec<SplitOutcome>,
    ) -> BacktestResult<BacktestReport> {
        let mut aggregator = ResultAggregator::new(self.config.forecast_horizon)
            .with_training_predictions(self.config.include_training_predictions);
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut cancelled = false;

        for outcome in outcomes {
            match outcome {
                SplitOutcome::Completed(result) => {
                    aggregator.accumulate(result);
                }
                SplitOutcome::Failed(failure) => failures.push(failure),
                SplitOutcome::Skipped(split, reason) => {
                    cancelled |= reason == SkipReason::Cancelled;
                    skipped.push(split);
                }
            }
        }

        if self.config.fail_fast {
            if let Some(first) = failures.iter().min_by_key(|f| f.split_key()) {
                return Err(BacktestError::SplitFailed {
                    split_key: first.split_key(),
                    source: first.error.clone(),
                });
            }
        }

        if cancelled {
            info!("Backtest cancelled: {} splits skipped", skipped.len());
        }
        info!(
            "Backtest complete: {} succeeded, {} failed, {} skipped",
            aggregator.len(),
            failures.len(),
            skipped.len()
        );

        Ok(BacktestReport {
            splits,
            table: aggregator.finalize(),
            failures,
            skipped,
            cancelled,
        })
    }
}

/// Stands in for a model that could not be built, failing every fit.
struct InvalidForecaster(ModelError);

impl Forecaster for InvalidForecaster {
    fn name(&self) -> &str {
        "invalid"
    }

    fn fit(&self, _train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        Err(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backtest::fold::tests::{stub, Stub};
    use crate::backtest::fold::FoldErrorKind;
    use crate::data::series::tests::daily_series;
    use crate::data::FutureFrame;
    use crate::metrics::{BuiltinMetric, MetricSet, Scorer};
    use crate::model::PredictionFrame;
    use crate::report::{ScoreCell, SplitStatus};
    use crate::split::WindowType;

    fn scenario_config() -> BacktestConfig {
        BacktestConfig {
            min_train_size: 80,
            forecast_horizon: 5,
            incremental_step: 5,
            ..Default::default()
        }
    }

    /// Predicts `position * 10`, failing predict on one split.
    struct FailOnSplit {
        test_start: usize,
    }

    struct FailOnSplitFit {
        test_start: usize,
    }

    impl Forecaster for FailOnSplit {
        fn name(&self) -> &str {
            "fail_on_split"
        }

        fn fit(&self, _train: &TimeSeries) -> Result<Box<dyn FittedModel>, ModelError> {
            Ok(Box::new(FailOnSplitFit {
                test_start: self.test_start,
            }))
        }
    }

    impl FittedModel for FailOnSplitFit {
        fn predict(&self, frame: &FutureFrame) -> Result<PredictionFrame, ModelError> {
            if frame.positions().first() == Some(&self.test_start) {
                return Err(ModelError::Other("diverged".to_string()));
            }
            let values = frame.positions().iter().map(|p| *p as f64 * 10.0).collect();
            PredictionFrame::new(frame.dates().to_vec(), values)
        }
    }

    #[test]
    fn test_plan_scenarios() {
        let engine = BacktestEngine::new(scenario_config()).unwrap();
        let splits = engine.plan(100).unwrap();
        assert_eq!(splits.len(), 4);

        let engine = BacktestEngine::new(BacktestConfig {
            min_train_size: 8,
            forecast_horizon: 5,
            incremental_step: 1,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            engine.plan(10),
            Err(BacktestError::InsufficientData {
                series_length: 10,
                required: 13
            })
        ));
    }

    #[test]
    fn test_plan_with_huge_horizon_is_insufficient() {
        let engine = BacktestEngine::new(BacktestConfig {
            min_train_size: 5,
            forecast_horizon: usize::MAX,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            engine.plan(100),
            Err(BacktestError::InsufficientData {
                series_length: 100,
                required: usize::MAX
            })
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_run() {
        let config = BacktestConfig {
            window_type: WindowType::Rolling,
            window_size: Some(10),
            ..scenario_config()
        };
        assert!(matches!(
            BacktestEngine::new(config),
            Err(BacktestError::InvalidSplitScheme(SplitError::WindowTooSmall { .. }))
        ));
    }

    #[test]
    fn test_failed_split_is_isolated() {
        let series = daily_series(100, |i| i as f64);
        let engine = BacktestEngine::new(scenario_config()).unwrap();

        // The second split of four tests positions 85..=89.
        let factory = || Box::new(FailOnSplit { test_start: 85 }) as Box<dyn Forecaster>;
        let report = engine.run(&series, factory).unwrap();

        assert_eq!(report.table.split_keys(), vec![0, 2, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].split_key(), 1);
        assert_eq!(report.failures[0].kind(), FoldErrorKind::Predict);
        assert_eq!(report.status(1), Some(SplitStatus::Failed));
        assert_eq!(report.status(2), Some(SplitStatus::Completed));

        let scores = report.score(&Scorer::new(MetricSet::builtin(&[BuiltinMetric::Mae])));
        assert!(scores.for_split(1).next().is_none());
        assert_eq!(scores.records().len(), 3);
        assert!(matches!(
            report.cell(&scores, 1, "mae", false),
            ScoreCell::SplitFailed(_)
        ));
        assert!(matches!(report.cell(&scores, 0, "mae", false), ScoreCell::Value(_)));
    }

    #[test]
    fn test_fail_fast_returns_lowest_failure() {
        let series = daily_series(100, |i| i as f64);
        let engine = BacktestEngine::new(BacktestConfig {
            fail_fast: true,
            max_workers: Some(1),
            ..scenario_config()
        })
        .unwrap();

        let factory = || Box::new(FailOnSplit { test_start: 85 }) as Box<dyn Forecaster>;
        match engine.run(&series, factory) {
            Err(BacktestError::SplitFailed { split_key, source }) => {
                assert_eq!(split_key, 1);
                assert_eq!(source.kind(), FoldErrorKind::Predict);
            }
            other => panic!("expected split failure, got {:?}", other.map(|r| r.splits.len())),
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let series = daily_series(100, |i| i as f64);
        let token = CancellationToken::new();
        let engine = BacktestEngine::new(scenario_config())
            .unwrap()
            .with_cancellation(token.clone());
        token.cancel();

        let report = engine.run(&series, stub(Stub::Position)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.skipped.len(), 4);
        assert!(report.table.is_empty());
        assert_eq!(report.status(0), Some(SplitStatus::Skipped));
    }

    #[test]
    fn test_cancelled_between_splits() {
        let series = daily_series(100, |i| i as f64);
        let token = CancellationToken::new();
        let trigger = token.clone();
        let engine = BacktestEngine::new(BacktestConfig {
            max_workers: Some(1),
            ..scenario_config()
        })
        .unwrap()
        .with_cancellation(token)
        .with_progress(Arc::new(move |done, _| {
            if done == 2 {
                trigger.cancel();
            }
        }));

        let report = engine.run(&series, stub(Stub::Position)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.table.split_keys(), vec![0, 1]);
        assert_eq!(
            report.skipped.iter().map(|s| s.split_key).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(report.failures.is_empty());
        assert_eq!(report.status(1), Some(SplitStatus::Completed));
        assert_eq!(report.status(2), Some(SplitStatus::Skipped));
    }

    #[test]
    fn test_timeout_becomes_failure() {
        let series = daily_series(30, |i| i as f64);
        let engine = BacktestEngine::new(BacktestConfig {
            min_train_size: 20,
            forecast_horizon: 5,
            incremental_step: 5,
            per_split_timeout_ms: Some(20),
            ..Default::default()
        })
        .unwrap();

        let report = engine
            .run(&series, stub(Stub::Sleep(Duration::from_millis(500))))
            .unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.kind() == FoldErrorKind::Timeout));
        assert!(report.table.is_empty());
    }

    #[test]
    fn test_run_is_idempotent_across_pools() {
        let series = daily_series(100, |i| (i as f64 * 0.3).sin() * 10.0 + 50.0);
        let scorer = Scorer::new(MetricSet::defaults());

        let parallel = BacktestEngine::new(BacktestConfig {
            include_training_predictions: true,
            ..scenario_config()
        })
        .unwrap();
        let sequential = BacktestEngine::new(BacktestConfig {
            include_training_predictions: true,
            max_workers: Some(1),
            ..scenario_config()
        })
        .unwrap();

        let kind = ModelKind::SeasonalNaive { period: 7 };
        let a = parallel.run_kind(&series, &kind).unwrap();
        let b = sequential.run_kind(&series, &kind).unwrap();
        assert_eq!(a.table, b.table);
        assert_eq!(a.score(&scorer), b.score(&scorer));
        assert_eq!(a.table.len(), 4 * 5 + (80 + 85 + 90 + 95));
    }

    #[test]
    fn test_progress_callback() {
        let series = daily_series(100, |i| i as f64);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let engine = BacktestEngine::new(scenario_config())
            .unwrap()
            .with_progress(Arc::new(move |_, total| {
                assert_eq!(total, 4);
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        engine.run(&series, stub(Stub::Position)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_run_kind_missing_regressor() {
        let series = daily_series(100, |i| i as f64);
        let engine = BacktestEngine::new(scenario_config()).unwrap();
        let kind = ModelKind::LinearTrend {
            regressors: vec!["promo".to_string()],
        };
        assert!(matches!(
            engine.run_kind(&series, &kind),
            Err(BacktestError::Configuration(_))
        ));
    }
}
