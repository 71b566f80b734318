//! The per-symbol record handed between store, coalescer and callers.

use super::provider::DataError;
use super::schema;
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider-reported fields for a symbol (currency, exchange, last price...).
///
/// The provider may not report anything, or may flag an error instead; both
/// are valid states and neither prevents the price history from being cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolMetadata {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields,
            error: None,
        }
    }

    /// Metadata that could not be retrieved.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Numeric field, if present and numeric.
    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// A normalized dataset for one symbol plus the time it was fetched.
///
/// `dataset` always has the canonical column set (see [`schema::CANONICAL_COLUMNS`]),
/// one row per trading day, ascending and unique by date, with no date after
/// `last_update`. Cloning is cheap and gives the caller an independent value:
/// polars frames are copy-on-write, so nothing a caller does to its copy
/// reaches the store.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub symbol: String,
    pub dataset: DataFrame,
    pub metadata: SymbolMetadata,
    pub last_update: DateTime<Utc>,
}

impl SymbolRecord {
    pub fn new(
        symbol: impl Into<String>,
        dataset: DataFrame,
        metadata: SymbolMetadata,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            dataset,
            metadata,
            last_update,
        }
    }

    /// Number of trading days in the dataset.
    pub fn rows(&self) -> usize {
        self.dataset.height()
    }

    /// Trading dates, ascending.
    pub fn dates(&self) -> Result<Vec<NaiveDate>, DataError> {
        schema::date_values(&self.dataset)
    }

    /// First and last trading date, if the dataset has rows.
    pub fn date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>, DataError> {
        let dates = self.dates()?;
        Ok(dates.first().copied().zip(dates.last().copied()))
    }
}
