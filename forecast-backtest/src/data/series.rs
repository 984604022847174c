//! Core time-series container.
//!
//! A `TimeSeries` is an ordered run of (date, response) observations with
//! optional regressor columns aligned by position. Splits address it by
//! integer offset, so every slice remembers where it sits in the parent
//! series.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DATE_COL: &str = "date";
pub const DEFAULT_RESPONSE_COL: &str = "y";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("Length mismatch: {dates} dates but {values} values")]
    LengthMismatch { dates: usize, values: usize },

    #[error("Regressor '{name}' has {len} values, expected {expected}")]
    RegressorLength {
        name: String,
        len: usize,
        expected: usize,
    },

    #[error("Duplicate date {0}")]
    DuplicateDate(NaiveDate),

    #[error("Dates must be strictly increasing: {previous} followed by {current}")]
    NotIncreasing {
        previous: NaiveDate,
        current: NaiveDate,
    },

    #[error("Non-finite value in '{column}' at row {row}")]
    NonFinite { column: String, row: usize },

    #[error("Index range {start}..={end} out of bounds for series of length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

pub type SeriesResult<T> = Result<T, SeriesError>;

/// Spacing between consecutive dates, inferred once per series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spacing {
    /// Fewer than two observations.
    Undetermined,
    /// Every gap is the same number of days.
    Regular { days: i64 },
    /// Gaps vary between `min_days` and `max_days`.
    Irregular { min_days: i64, max_days: i64 },
}

fn check_finite(column: &str, values: &[f64]) -> SeriesResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(SeriesError::NonFinite {
            column: column.to_string(),
            row,
        }),
        None => Ok(()),
    }
}

/// Ordered observations with optional regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    date_col: String,
    response_col: String,
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
    regressors: BTreeMap<String, Vec<f64>>,
    /// Position of the first observation within the series this one was sliced from.
    offset: usize,
}

impl TimeSeries {
    /// Build a series, checking that dates are strictly increasing and values finite.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> SeriesResult<Self> {
        if dates.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                dates: dates.len(),
                values: values.len(),
            });
        }

        for window in dates.windows(2) {
            let (previous, current) = (window[0], window[1]);
            if current == previous {
                return Err(SeriesError::DuplicateDate(current));
            }
            if current < previous {
                return Err(SeriesError::NotIncreasing { previous, current });
            }
        }

        check_finite(DEFAULT_RESPONSE_COL, &values)?;

        Ok(Self {
            date_col: DEFAULT_DATE_COL.to_string(),
            response_col: DEFAULT_RESPONSE_COL.to_string(),
            dates,
            values,
            regressors: BTreeMap::new(),
            offset: 0,
        })
    }

    /// Set the column names the series was loaded from.
    pub fn with_columns(mut self, date_col: &str, response_col: &str) -> Self {
        self.date_col = date_col.to_string();
        self.response_col = response_col.to_string();
        self
    }

    /// Attach a regressor column aligned with the dates.
    pub fn with_regressor(mut self, name: &str, values: Vec<f64>) -> SeriesResult<Self> {
        if values.len() != self.dates.len() {
            return Err(SeriesError::RegressorLength {
                name: name.to_string(),
                len: values.len(),
                expected: self.dates.len(),
            });
        }
        check_finite(name, &values)?;
        self.regressors.insert(name.to_string(), values);
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

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn date_col(&self) -> &str {
        &self.date_col
    }

    pub fn response_col(&self) -> &str {
        &self.response_col
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn regressor(&self, name: &str) -> Option<&[f64]> {
        self.regressors.get(name).map(|v| v.as_slice())
    }

    pub fn regressor_names(&self) -> impl Iterator<Item = &str> {
        self.regressors.keys().map(|k| k.as_str())
    }

    /// Absolute positions of each observation, counted from the root series.
    pub fn positions(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// Copy out the observations at `range` (inclusive, relative to this series).
    pub fn slice(&self, range: RangeInclusive<usize>) -> SeriesResult<Self> {
        let (start, end) = self.check_range(&range)?;

        Ok(Self {
            date_col: self.date_col.clone(),
            response_col: self.response_col.clone(),
            dates: self.dates[start..=end].to_vec(),
            values: self.values[start..=end].to_vec(),
            regressors: self
                .regressors
                .iter()
                .map(|(name, values)| (name.clone(), values[start..=end].to_vec()))
                .collect(),
            offset: self.offset + start,
        })
    }

    /// Dates and regressors at `range`, without the response.
    pub fn future_frame(&self, range: RangeInclusive<usize>) -> SeriesResult<FutureFrame> {
        let (start, end) = self.check_range(&range)?;

        Ok(FutureFrame {
            dates: self.dates[start..=end].to_vec(),
            positions: (self.offset + start..=self.offset + end).collect(),
            regressors: self
                .regressors
                .iter()
                .map(|(name, values)| (name.clone(), values[start..=end].to_vec()))
                .collect(),
        })
    }

    /// Infer the spacing between consecutive dates.
    pub fn spacing(&self) -> Spacing {
        let mut gaps = self.dates.windows(2).map(|w| (w[1] - w[0]).num_days());

        let Some(first) = gaps.next() else {
            return Spacing::Undetermined;
        };

        let (min_days, max_days) = gaps.fold((first, first), |(lo, hi), gap| {
            (lo.min(gap), hi.max(gap))
        });

        if min_days == max_days {
            Spacing::Regular { days: min_days }
        } else {
            Spacing::Irregular { min_days, max_days }
        }
    }

    fn check_range(&self, range: &RangeInclusive<usize>) -> SeriesResult<(usize, usize)> {
        let (start, end) = (*range.start(), *range.end());
        if start > end || end >= self.len() {
            return Err(SeriesError::OutOfBounds {
                start,
                end,
                len: self.len(),
            });
        }
        Ok((start, end))
    }
}

/// Inputs a fitted model receives when asked to predict: dates, their
/// absolute positions and regressor values. The response is never included.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureFrame {
    dates: Vec<NaiveDate>,
    positions: Vec<usize>,
    regressors: BTreeMap<String, Vec<f64>>,
}

impl FutureFrame {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn regressor(&self, name: &str) -> Option<&[f64]> {
        self.regressors.get(name).map(|v| v.as_slice())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    /// Daily series of `len` points starting 2020-01-01 with `value(i)` as response.
    pub(crate) fn daily_series(len: usize, value: impl Fn(usize) -> f64) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates = (0..len).map(|i| start + Duration::days(i as i64)).collect();
        let values = (0..len).map(value).collect();
        TimeSeries::new(dates, values).unwrap()
    }

    #[test]
    fn test_rejects_duplicate_dates() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let err = TimeSeries::new(vec![d, d], vec![1.0, 2.0]).unwrap_err();
        assert_eq!(err, SeriesError::DuplicateDate(d));
    }

    #[test]
    fn test_rejects_decreasing_dates() {
        let a = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let b = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(matches!(
            TimeSeries::new(vec![a, b], vec![1.0, 2.0]),
            Err(SeriesError::NotIncreasing { .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(matches!(
            TimeSeries::new(vec![d], vec![]),
            Err(SeriesError::LengthMismatch { dates: 1, values: 0 })
        ));
    }

    #[test]
    fn test_slice_keeps_offset_and_regressors() {
        let series = daily_series(10, |i| i as f64)
            .with_regressor("promo", (0..10).map(|i| (i * 10) as f64).collect())
            .unwrap();

        let slice = series.slice(3..=5).unwrap();
        assert_eq!(slice.values(), &[3.0, 4.0, 5.0]);
        assert_eq!(slice.offset(), 3);
        assert_eq!(slice.regressor("promo"), Some(&[30.0, 40.0, 50.0][..]));

        // Slicing a slice is relative to it but positions stay absolute.
        let inner = slice.slice(1..=2).unwrap();
        assert_eq!(inner.offset(), 4);
        assert_eq!(inner.positions(), 4..6);
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let series = daily_series(5, |_| 0.0);
        assert!(matches!(
            series.slice(3..=5),
            Err(SeriesError::OutOfBounds { len: 5, .. })
        ));
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let dates = daily_series(3, |_| 0.0).dates().to_vec();
        assert_eq!(
            TimeSeries::new(dates.clone(), vec![1.0, f64::NAN, 3.0]),
            Err(SeriesError::NonFinite {
                column: "y".to_string(),
                row: 1
            })
        );

        let series = TimeSeries::new(dates, vec![1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            series.with_regressor("promo", vec![0.0, 1.0, f64::INFINITY]),
            Err(SeriesError::NonFinite { row: 2, .. })
        ));
    }

    #[test]
    fn test_future_frame_hides_response() {
        let series = daily_series(6, |i| i as f64 * 2.0);
        let frame = series.future_frame(4..=5).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.positions(), &[4, 5]);
        assert_eq!(frame.dates(), &series.dates()[4..=5]);
    }

    #[test]
    fn test_spacing() {
        assert_eq!(daily_series(1, |_| 0.0).spacing(), Spacing::Undetermined);
        assert_eq!(daily_series(4, |_| 0.0).spacing(), Spacing::Regular { days: 1 });

        let dates = vec![
            NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2020, 2, 29).unwrap(),
            NaiveDate::from_ymd_opt(2020, 3, 31).unwrap(),
        ];
        let monthly = TimeSeries::new(dates, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            monthly.spacing(),
            Spacing::Irregular {
                min_days: 29,
                max_days: 31
            }
        );
    }
}
