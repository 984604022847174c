//! Series loader for CSV and Parquet files.
//!
//! Reads a tabular file (or an in-memory polars `DataFrame`) into a
//! `TimeSeries`. Date, response and regressor column names are configurable;
//! rows are sorted by date before the series invariants are checked.

use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

use super::series::{SeriesError, TimeSeries, DEFAULT_DATE_COL, DEFAULT_RESPONSE_COL};

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid series: {0}")]
    Series(#[from] SeriesError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Loader that maps dataframe columns onto a `TimeSeries`.
#[derive(Debug, Clone)]
pub struct SeriesLoader {
    date_col: String,
    response_col: String,
    regressor_cols: Vec<String>,
    date_format: String,
}

impl Default for SeriesLoader {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_COL, DEFAULT_RESPONSE_COL)
    }
}

impl SeriesLoader {
    pub fn new(date_col: &str, response_col: &str) -> Self {
        Self {
            date_col: date_col.to_string(),
            response_col: response_col.to_string(),
            regressor_cols: Vec::new(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    /// Regressor columns to carry alongside the response.
    pub fn with_regressors(mut self, columns: &[String]) -> Self {
        self.regressor_cols = columns.to_vec();
        self
    }

    /// `chrono` format string for parsing the date column.
    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = format.to_string();
        self
    }

    /// Load a `.csv` or `.parquet` file.
    pub fn load(&self, path: &Path) -> Result<TimeSeries, LoaderError> {
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let df = match extension.as_deref() {
            Some("csv") => CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?,
            Some("parquet") => LazyFrame::scan_parquet(path, ScanArgsParquet::default())?.collect()?,
            _ => return Err(LoaderError::UnsupportedFormat(path.display().to_string())),
        };
        debug!("Read {} rows from {}", df.height(), path.display());

        self.read_dataframe(&df)
    }

    /// Convert an in-memory dataframe.
    pub fn read_dataframe(&self, df: &DataFrame) -> Result<TimeSeries, LoaderError> {
        let dates = self.parse_dates(df)?;
        let values = self.float_column(df, &self.response_col)?;

        let mut regressors = Vec::with_capacity(self.regressor_cols.len());
        for name in &self.regressor_cols {
            regressors.push((name.as_str(), self.float_column(df, name)?));
        }

        // Sort rows by date; the series constructor rejects duplicates.
        let mut order: Vec<usize> = (0..dates.len()).collect();
        order.sort_by_key(|&i| dates[i]);
        let reorder = |column: &[f64]| order.iter().map(|&i| column[i]).collect::<Vec<_>>();

        let sorted_dates = order.iter().map(|&i| dates[i]).collect();
        let mut series = TimeSeries::new(sorted_dates, reorder(&values))?
            .with_columns(&self.date_col, &self.response_col);

        for (name, column) in regressors {
            series = series.with_regressor(name, reorder(&column))?;
        }

        Ok(series)
    }

    fn parse_dates(&self, df: &DataFrame) -> Result<Vec<NaiveDate>, LoaderError> {
        let column = df.column(&self.date_col)?.cast(&DataType::String)?;
        let strings = column.str()?;

        let mut dates = Vec::with_capacity(strings.len());
        for (row, value) in strings.into_iter().enumerate() {
            let raw = value.ok_or_else(|| {
                LoaderError::InvalidData(format!("Null date in '{}' at row {}", self.date_col, row))
            })?;
            dates.push(self.parse_date(raw).ok_or_else(|| {
                LoaderError::InvalidData(format!(
                    "Unparseable date '{}' in '{}' at row {}",
                    raw, self.date_col, row
                ))
            })?);
        }
        Ok(dates)
    }

    fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        NaiveDate::parse_from_str(raw, &self.date_format)
            .ok()
            // Datetime strings ("2020-01-01 00:00:00") keep their date prefix.
            .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, DEFAULT_DATE_FORMAT).ok()))
    }

    fn float_column(&self, df: &DataFrame, name: &str) -> Result<Vec<f64>, LoaderError> {
        let column = df.column(name)?.cast(&DataType::Float64)?;
        let values = column.f64()?;

        values
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.ok_or_else(|| {
                    LoaderError::InvalidData(format!("Null value in '{}' at row {}", name, row))
                })
            })
            .collect()
    }
}
