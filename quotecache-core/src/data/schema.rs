//! Column layout of raw and canonical daily frames, plus typed column access.

use super::provider::DataError;
use chrono::NaiveDate;
use polars::prelude::*;

pub const DATE: &str = "date";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const ADJ_CLOSE: &str = "adj_close";
pub const VOLUME: &str = "volume";
pub const DIVIDENDS: &str = "dividends";
pub const STOCK_SPLITS: &str = "stock_splits";
pub const ADJ_RATIO: &str = "adj_ratio";
pub const ADJ_OPEN: &str = "adj_open";
pub const ADJ_HIGH: &str = "adj_high";
pub const ADJ_LOW: &str = "adj_low";

/// Columns a raw provider frame must carry before it can be normalized.
pub const REQUIRED_RAW_COLUMNS: [&str; 6] = [DATE, OPEN, HIGH, LOW, CLOSE, ADJ_CLOSE];

/// Column order of a normalized (on-disk) frame.
pub const CANONICAL_COLUMNS: [&str; 13] = [
    DATE,
    OPEN,
    HIGH,
    LOW,
    CLOSE,
    ADJ_CLOSE,
    VOLUME,
    DIVIDENDS,
    STOCK_SPLITS,
    ADJ_RATIO,
    ADJ_OPEN,
    ADJ_HIGH,
    ADJ_LOW,
];

/// Column order of a projected (caller-facing) frame.
pub const VIEW_COLUMNS: [&str; 8] = [
    DATE,
    OPEN,
    HIGH,
    LOW,
    CLOSE,
    VOLUME,
    DIVIDENDS,
    STOCK_SPLITS,
];

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn shape_err(context: &str) -> impl Fn(PolarsError) -> DataError + '_ {
    move |e| DataError::DataShape(format!("{context}: {e}"))
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Fail with `DataShape` naming every missing column.
pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), DataError> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !has_column(df, name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DataError::DataShape(format!(
            "missing column(s): {}",
            missing.join(", ")
        )))
    }
}

/// Values of a numeric column as f64; nulls become NaN.
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df.column(name).map_err(shape_err(name))?;
    let casted = column.cast(&DataType::Float64).map_err(shape_err(name))?;
    let ca = casted.f64().map_err(shape_err(name))?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Values of a volume-like column as u64; nulls become 0.
pub fn u64_values(df: &DataFrame, name: &str) -> Result<Vec<u64>, DataError> {
    let column = df.column(name).map_err(shape_err(name))?;
    let casted = column.cast(&DataType::UInt64).map_err(shape_err(name))?;
    let ca = casted.u64().map_err(shape_err(name))?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0)).collect())
}

/// The `date` column as calendar dates. Null dates are a shape error.
pub fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let column = df.column(DATE).map_err(shape_err(DATE))?;
    let days = column.cast(&DataType::Int32).map_err(shape_err(DATE))?;
    let ca = days.i32().map_err(shape_err(DATE))?;
    ca.into_iter()
        .enumerate()
        .map(|(row, day)| {
            day.map(|d| epoch() + chrono::Duration::days(i64::from(d)))
                .ok_or_else(|| DataError::DataShape(format!("null date at row {row}")))
        })
        .collect()
}

/// Build a polars `Date` column from calendar dates.
pub fn date_column(dates: &[NaiveDate]) -> Result<Column, DataError> {
    let days: Vec<i32> = dates
        .iter()
        .map(|d| (*d - epoch()).num_days() as i32)
        .collect();
    Column::new(DATE.into(), days)
        .cast(&DataType::Date)
        .map_err(shape_err("date cast"))
}

pub fn f64_column(name: &str, values: Vec<f64>) -> Column {
    Column::new(name.into(), values)
}

pub fn u64_column(name: &str, values: Vec<u64>) -> Column {
    Column::new(name.into(), values)
}

pub fn frame(columns: Vec<Column>) -> Result<DataFrame, DataError> {
    DataFrame::new(columns).map_err(shape_err("dataframe creation"))
}

/// Check that a frame read back from disk has the canonical layout.
pub fn validate_canonical(df: &DataFrame) -> Result<(), DataError> {
    require_columns(df, &CANONICAL_COLUMNS)?;
    let actual = df
        .column(DATE)
        .map_err(shape_err(DATE))?
        .dtype()
        .clone();
    if actual != DataType::Date {
        return Err(DataError::DataShape(format!(
            "column 'date' has type {actual:?}, expected Date"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_column_roundtrip() {
        let dates = vec![day(1999, 12, 31), day(2024, 1, 2)];
        let df = frame(vec![date_column(&dates).unwrap()]).unwrap();
        assert_eq!(date_values(&df).unwrap(), dates);
    }

    #[test]
    fn require_columns_names_all_missing() {
        let df = frame(vec![
            date_column(&[day(2024, 1, 2)]).unwrap(),
            f64_column(OPEN, vec![1.0]),
        ])
        .unwrap();

        let err = require_columns(&df, &REQUIRED_RAW_COLUMNS).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DataError::DataShape(_)));
        assert!(msg.contains("high"), "{msg}");
        assert!(msg.contains("adj_close"), "{msg}");
        assert!(!msg.contains("open"), "{msg}");
    }

    #[test]
    fn integer_prices_read_as_f64() {
        let df = frame(vec![Column::new(CLOSE.into(), vec![10i64, 11])]).unwrap();
        assert_eq!(f64_values(&df, CLOSE).unwrap(), vec![10.0, 11.0]);
    }

    #[test]
    fn validate_canonical_rejects_integer_dates() {
        let mut columns: Vec<Column> = CANONICAL_COLUMNS
            .iter()
            .skip(1)
            .map(|name| f64_column(name, vec![1.0]))
            .collect();
        columns.insert(0, Column::new(DATE.into(), vec![19724i32]));
        let df = frame(columns).unwrap();

        assert!(validate_canonical(&df).is_err());
    }
}
