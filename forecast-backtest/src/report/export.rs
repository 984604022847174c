//! Polars export of result and metric tables.
//!
//! Column names come from `ColumnKey`, so exported files share one schema
//! across runs. Dates are written as `%Y-%m-%d` strings.

use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::backtest::{AggregatedTable, WideSplitTable};
use crate::data::ColumnKey;
use crate::metrics::ScoreTable;

use super::BacktestReport;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Result<Self, ExportError> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

fn column<T, V>(key: ColumnKey, values: V) -> Column
where
    Series: NamedFrom<V, T>,
    T: ?Sized,
{
    Column::new(key.as_str().into(), values)
}

/// Long-format results: one row per (date, split).
pub fn results_frame(table: &AggregatedTable) -> Result<DataFrame, ExportError> {
    let rows = table.rows();
    let df = DataFrame::new(vec![
        column(
            ColumnKey::Date,
            rows.iter().map(|r| r.date.to_string()).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::SplitKey,
            rows.iter().map(|r| r.split_key as u64).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::Actual,
            rows.iter().map(|r| r.actual).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::Predicted,
            rows.iter().map(|r| r.predicted).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::IsTrainingRow,
            rows.iter().map(|r| r.is_training_row).collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

/// One split with training and test columns side by side.
pub fn wide_frame(table: &WideSplitTable) -> Result<DataFrame, ExportError> {
    let rows = &table.rows;
    let df = DataFrame::new(vec![
        column(
            ColumnKey::Date,
            rows.iter().map(|r| r.date.to_string()).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::TrainActual,
            rows.iter().map(|r| r.train_actual).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::TrainPredicted,
            rows.iter().map(|r| r.train_predicted).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::TestActual,
            rows.iter().map(|r| r.test_actual).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::TestPredicted,
            rows.iter().map(|r| r.test_predicted).collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

/// Metric records. Failed metrics have a null value and an error message.
pub fn metrics_frame(scores: &ScoreTable) -> Result<DataFrame, ExportError> {
    let records = scores.records();
    let df = DataFrame::new(vec![
        column(
            ColumnKey::SplitKey,
            records.iter().map(|r| r.split_key as u64).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::MetricName,
            records.iter().map(|r| r.metric_name.clone()).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::MetricValue,
            records.iter().map(|r| r.metric_value.value()).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::IsTrainingMetric,
            records.iter().map(|r| r.is_training_metric).collect::<Vec<_>>(),
        ),
        column(
            ColumnKey::MetricError,
            records
                .iter()
                .map(|r| r.metric_value.error().map(|e| e.to_string()))
                .collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

/// Write a frame to `path` in the given format.
pub fn write_frame(
    df: &mut DataFrame,
    path: &Path,
    format: ExportFormat,
) -> Result<(), ExportError> {
    let mut file = File::create(path)?;
    match format {
        ExportFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        ExportFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
    }
    Ok(())
}

/// Write `results.<ext>` and `metrics.<ext>` into `dir`, creating it if needed.
pub fn write_report(
    dir: &Path,
    report: &BacktestReport,
    scores: &ScoreTable,
    format: ExportFormat,
) -> Result<Vec<PathBuf>, ExportError> {
    std::fs::create_dir_all(dir)?;

    let results_path = dir.join(format!("results.{}", format.extension()));
    write_frame(&mut results_frame(&report.table)?, &results_path, format)?;

    let metrics_path = dir.join(format!("metrics.{}", format.extension()));
    write_frame(&mut metrics_frame(scores)?, &metrics_path, format)?;

    info!(
        "Wrote {} result rows and {} metric records to {}",
        report.table.len(),
        scores.len(),
        dir.display()
    );

    Ok(vec![results_path, metrics_path])
}
