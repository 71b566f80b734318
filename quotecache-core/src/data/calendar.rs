//! Trading calendar and risk-free rate, both read through the coalescer.

use super::coalescer::FetchCoalescer;
use super::provider::DataError;
use super::record::SymbolRecord;
use chrono::NaiveDate;
use tracing::info;

/// Metadata field carrying the latest quote.
pub const MARKET_PRICE_FIELD: &str = "regularMarketPrice";

/// Trading days, taken from the full history of a long-listed reference symbol.
pub fn trading_days(
    coalescer: &FetchCoalescer,
    reference_symbol: &str,
) -> Result<Vec<NaiveDate>, DataError> {
    coalescer.get_one(reference_symbol)?.dates()
}

/// Annualized risk-free rate as a fraction (a 5.25 quote gives 0.0525).
pub fn risk_free_rate(coalescer: &FetchCoalescer, symbol: &str) -> Result<f64, DataError> {
    let record = coalescer.get_one(symbol)?;
    let rate = risk_free_rate_from(&record)?;
    info!(symbol, rate, "risk-free rate");
    Ok(rate)
}

/// [`risk_free_rate`] from an already resolved record.
pub fn risk_free_rate_from(record: &SymbolRecord) -> Result<f64, DataError> {
    record
        .metadata
        .f64_field(MARKET_PRICE_FIELD)
        .map(|percent| percent / 100.0)
        .ok_or_else(|| DataError::MissingField {
            symbol: record.symbol.clone(),
            field: MARKET_PRICE_FIELD.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::SymbolMetadata;
    use polars::prelude::DataFrame;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record_with(metadata: SymbolMetadata) -> SymbolRecord {
        SymbolRecord::new("^IRX", DataFrame::empty(), metadata, chrono::Utc::now())
    }

    #[test]
    fn rate_is_quote_over_one_hundred() {
        let mut fields = BTreeMap::new();
        fields.insert(MARKET_PRICE_FIELD.to_string(), json!(5.25));
        let rate = risk_free_rate_from(&record_with(SymbolMetadata::new(fields))).unwrap();
        assert!((rate - 0.0525).abs() < 1e-12);
    }

    #[test]
    fn missing_quote_is_missing_field() {
        let record = record_with(SymbolMetadata::unavailable("404"));
        let err = risk_free_rate_from(&record).unwrap_err();
        assert!(
            matches!(err, DataError::MissingField { ref field, .. } if field == MARKET_PRICE_FIELD)
        );
    }
}
