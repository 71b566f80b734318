//! Record transforms: raw provider frame -> canonical frame -> caller view.
//!
//! `normalize` runs once, when data is ingested, and derives the adjusted
//! price family from the provider's adjusted close. `project` runs on every
//! read and exposes exactly one price family (adjusted or raw) under the plain
//! `open`/`high`/`low`/`close` names.

use super::provider::DataError;
use super::record::SymbolRecord;
use super::schema::{self, *};
use chrono::NaiveDate;
use polars::prelude::DataFrame;

/// Normalize a raw provider frame into the canonical on-disk layout.
pub fn normalize(raw: &DataFrame) -> Result<DataFrame, DataError> {
    normalize_as_of(raw, None)
}

/// Normalize, additionally dropping rows dated after `as_of`.
///
/// Rows are sorted ascending by date and the first row of any duplicated date
/// wins. `volume`, `dividends` and `stock_splits` default to zero when the
/// provider did not send them.
pub fn normalize_as_of(raw: &DataFrame, as_of: Option<NaiveDate>) -> Result<DataFrame, DataError> {
    schema::require_columns(raw, &REQUIRED_RAW_COLUMNS)?;

    let n = raw.height();
    let dates = schema::date_values(raw)?;
    let open = schema::f64_values(raw, OPEN)?;
    let high = schema::f64_values(raw, HIGH)?;
    let low = schema::f64_values(raw, LOW)?;
    let close = schema::f64_values(raw, CLOSE)?;
    let adj_close = schema::f64_values(raw, ADJ_CLOSE)?;
    let volume = if schema::has_column(raw, VOLUME) {
        schema::u64_values(raw, VOLUME)?
    } else {
        vec![0; n]
    };
    let dividends = optional_f64(raw, DIVIDENDS, n)?;
    let splits = optional_f64(raw, STOCK_SPLITS, n)?;

    // sort_by_key is stable, so dedup keeps the provider's first row per date
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| dates[i]);
    order.dedup_by_key(|i| dates[*i]);
    if let Some(limit) = as_of {
        order.retain(|&i| dates[i] <= limit);
    }

    let pick = |values: &[f64]| -> Vec<f64> { order.iter().map(|&i| values[i]).collect() };

    let close_c = pick(&close);
    let adj_close_c = pick(&adj_close);
    let ratio: Vec<f64> = adj_close_c
        .iter()
        .zip(&close_c)
        .map(|(adj, raw_close)| adj / raw_close)
        .collect();
    let open_c = pick(&open);
    let high_c = pick(&high);
    let low_c = pick(&low);
    let scale = |values: &[f64]| -> Vec<f64> {
        values.iter().zip(&ratio).map(|(v, r)| v * r).collect()
    };
    let adj_open = scale(&open_c);
    let adj_high = scale(&high_c);
    let adj_low = scale(&low_c);

    let ordered_dates: Vec<NaiveDate> = order.iter().map(|&i| dates[i]).collect();
    let ordered_volume: Vec<u64> = order.iter().map(|&i| volume[i]).collect();

    schema::frame(vec![
        schema::date_column(&ordered_dates)?,
        schema::f64_column(OPEN, open_c),
        schema::f64_column(HIGH, high_c),
        schema::f64_column(LOW, low_c),
        schema::f64_column(CLOSE, close_c),
        schema::f64_column(ADJ_CLOSE, adj_close_c),
        schema::u64_column(VOLUME, ordered_volume),
        schema::f64_column(DIVIDENDS, pick(&dividends)),
        schema::f64_column(STOCK_SPLITS, pick(&splits)),
        schema::f64_column(ADJ_RATIO, ratio),
        schema::f64_column(ADJ_OPEN, adj_open),
        schema::f64_column(ADJ_HIGH, adj_high),
        schema::f64_column(ADJ_LOW, adj_low),
    ])
}

fn optional_f64(raw: &DataFrame, name: &str, n: usize) -> Result<Vec<f64>, DataError> {
    if schema::has_column(raw, name) {
        schema::f64_values(raw, name)
    } else {
        Ok(vec![0.0; n])
    }
}

/// Caller-facing view of a record.
///
/// With `auto_adjust` the plain OHLC columns carry the adjusted prices; without
/// it they carry the raw prices. The `adj_*` columns never appear in a view.
pub fn project(record: &SymbolRecord, auto_adjust: bool) -> Result<DataFrame, DataError> {
    project_frame(&record.dataset, auto_adjust)
}

/// [`project`] on a bare canonical frame.
pub fn project_frame(dataset: &DataFrame, auto_adjust: bool) -> Result<DataFrame, DataError> {
    schema::require_columns(dataset, &CANONICAL_COLUMNS)?;

    let (open, high, low, close) = if auto_adjust {
        (ADJ_OPEN, ADJ_HIGH, ADJ_LOW, ADJ_CLOSE)
    } else {
        (OPEN, HIGH, LOW, CLOSE)
    };

    let carried = |name: &str| {
        dataset
            .column(name)
            .cloned()
            .map_err(|e| DataError::DataShape(format!("{name}: {e}")))
    };

    schema::frame(vec![
        carried(DATE)?,
        schema::f64_column(OPEN, schema::f64_values(dataset, open)?),
        schema::f64_column(HIGH, schema::f64_values(dataset, high)?),
        schema::f64_column(LOW, schema::f64_values(dataset, low)?),
        schema::f64_column(CLOSE, schema::f64_values(dataset, close)?),
        carried(VOLUME)?,
        carried(DIVIDENDS)?,
        carried(STOCK_SPLITS)?,
    ])
}
