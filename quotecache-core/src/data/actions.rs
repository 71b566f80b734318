//! Corporate actions (dividends and splits) extracted from a record.

use super::provider::DataError;
use super::record::SymbolRecord;
use super::schema::{self, DIVIDENDS, STOCK_SPLITS};
use chrono::NaiveDate;
use serde::Serialize;

/// A dividend amount or split ratio on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorporateAction {
    pub date: NaiveDate,
    pub value: f64,
}

/// A day with a dividend, a split, or both. The missing one is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActionRow {
    pub date: NaiveDate,
    pub dividend: f64,
    pub split: f64,
}

fn is_event(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn events(record: &SymbolRecord, column: &str) -> Result<Vec<CorporateAction>, DataError> {
    let dates = record.dates()?;
    let values = schema::f64_values(&record.dataset, column)?;
    Ok(dates
        .into_iter()
        .zip(values)
        .filter(|(_, value)| is_event(*value))
        .map(|(date, value)| CorporateAction { date, value })
        .collect())
}

/// Dividend payments, ascending by date.
pub fn dividends(record: &SymbolRecord) -> Result<Vec<CorporateAction>, DataError> {
    events(record, DIVIDENDS)
}

/// Split ratios (2.0 for a 2-for-1), ascending by date.
pub fn splits(record: &SymbolRecord) -> Result<Vec<CorporateAction>, DataError> {
    events(record, STOCK_SPLITS)
}

pub fn actions(record: &SymbolRecord) -> Result<Vec<ActionRow>, DataError> {
    let dates = record.dates()?;
    let dividends = schema::f64_values(&record.dataset, DIVIDENDS)?;
    let splits = schema::f64_values(&record.dataset, STOCK_SPLITS)?;

    let zero_nan = |v: f64| if v.is_nan() { 0.0 } else { v };
    Ok(dates
        .into_iter()
        .zip(dividends.into_iter().zip(splits))
        .filter(|(_, (dividend, split))| is_event(*dividend) || is_event(*split))
        .map(|(date, (dividend, split))| ActionRow {
            date,
            dividend: zero_nan(dividend),
            split: zero_nan(split),
        })
        .collect())
}
