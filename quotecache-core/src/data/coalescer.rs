//! Fetch coalescer: cache-first lookup with one batched provider call.
//!
//! Resolution for a set of symbols:
//! 1. Deduplicate (first occurrence wins the ordering)
//! 2. Serve every fresh cache entry
//! 3. Hand all misses to the provider in a single `fetch_batch`
//! 4. Normalize, stamp with the time the fetch completed, and store each dataset
//!
//! A failure for one symbol never costs the others their results.

use super::actions::{self, ActionRow, CorporateAction};
use super::cache::CacheStore;
use super::provider::{DataError, DataSource, MarketDataProvider};
use super::record::SymbolRecord;
use super::transform;
use super::yahoo::YahooProvider;
use crate::clock::{Clock, SystemClock};
use crate::config::QuoteCacheConfig;
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of resolving a set of symbols.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Distinct requested symbols, in request order.
    pub symbols: Vec<String>,
    pub records: BTreeMap<String, SymbolRecord>,
    pub failures: BTreeMap<String, DataError>,
    pub sources: BTreeMap<String, DataSource>,
    /// Provider batch calls made; 0 or 1.
    pub remote_calls: usize,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All records, or [`DataError::BatchFailed`] naming every failed symbol.
    pub fn into_complete(self) -> Result<BTreeMap<String, SymbolRecord>, DataError> {
        if self.failures.is_empty() {
            Ok(self.records)
        } else {
            Err(DataError::BatchFailed {
                symbols: self.failures.into_keys().collect(),
            })
        }
    }

    /// Take one symbol's result out of the outcome.
    pub fn take(&mut self, symbol: &str) -> Result<SymbolRecord, DataError> {
        if let Some(record) = self.records.remove(symbol) {
            return Ok(record);
        }
        Err(self
            .failures
            .remove(symbol)
            .unwrap_or_else(|| DataError::Other(format!("'{symbol}' was not requested"))))
    }
}

/// Per-symbol values derived from records, plus everything that failed.
#[derive(Debug)]
pub struct SymbolBatch<T> {
    pub values: BTreeMap<String, T>,
    pub failures: BTreeMap<String, DataError>,
}

impl<T> SymbolBatch<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct FetchCoalescer {
    store: CacheStore,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
}

impl FetchCoalescer {
    pub fn new(
        store: CacheStore,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
        }
    }

    /// Wall-clock store plus the Yahoo provider, as described by `config`.
    pub fn from_config(config: &QuoteCacheConfig) -> Result<Self, DataError> {
        let policy = config
            .freshness_policy()
            .map_err(|e| DataError::Other(e.to_string()))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = CacheStore::new(&config.cache, policy, clock.clone());
        let provider = Arc::new(YahooProvider::new(&config.provider)?);
        Ok(Self::new(store, provider, clock))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn MarketDataProvider {
        self.provider.as_ref()
    }

    /// Resolve `symbols`, making at most one provider call.
    pub fn get<S: AsRef<str>>(&self, symbols: &[S]) -> FetchOutcome {
        let mut outcome = FetchOutcome {
            symbols: dedup_symbols(symbols),
            ..FetchOutcome::default()
        };

        let mut misses = Vec::new();
        for symbol in &outcome.symbols {
            match self.store.exists_and_fresh(symbol) {
                Some(record) => {
                    outcome.sources.insert(symbol.clone(), DataSource::Cache);
                    outcome.records.insert(symbol.clone(), record);
                }
                None => misses.push(symbol.clone()),
            }
        }

        if !misses.is_empty() {
            info!(
                hits = outcome.records.len(),
                misses = misses.len(),
                provider = self.provider.name(),
                "fetching cache misses"
            );
            self.fetch_misses(&misses, &mut outcome);
        }

        for (symbol, error) in &outcome.failures {
            warn!(symbol = %symbol, error = %error, "symbol unavailable");
        }
        outcome
    }

    fn fetch_misses(&self, misses: &[String], outcome: &mut FetchOutcome) {
        let mut batch = self.provider.fetch_batch(misses);
        outcome.remote_calls += 1;

        // stamp with completion time; retries can carry a fetch past the cutoff
        let now = self.clock.now();
        let as_of = self.store.policy().local_date(&now);

        for symbol in misses {
            let fetched = batch.remove(symbol).unwrap_or_else(|| {
                Err(DataError::ProviderFetch {
                    symbol: symbol.clone(),
                    reason: "provider returned no result".into(),
                })
            });

            let record = fetched.and_then(|dataset| {
                let normalized = transform::normalize_as_of(&dataset.history, Some(as_of))?;
                if normalized.height() == 0 {
                    return Err(DataError::DataShape(format!(
                        "no rows for '{symbol}' on or before {as_of}"
                    )));
                }
                Ok(SymbolRecord::new(symbol.clone(), normalized, dataset.metadata, now))
            });

            match record {
                Ok(record) => {
                    match self.store.put_from(symbol, &record, self.provider.name()) {
                        Ok(put) => debug!(symbol = %symbol, ?put, "stored fetched record"),
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "could not cache fetched record")
                        }
                    }
                    outcome.sources.insert(symbol.clone(), DataSource::Remote);
                    outcome.records.insert(symbol.clone(), record);
                }
                Err(e) => {
                    outcome.failures.insert(symbol.clone(), e);
                }
            }
        }
    }

    /// Resolve a single symbol, surfacing its own error on failure.
    pub fn get_one(&self, symbol: &str) -> Result<SymbolRecord, DataError> {
        self.get(&[symbol]).take(symbol)
    }

    /// Resolve `symbols` and derive a value from each record.
    pub fn get_with<S, T, F>(&self, symbols: &[S], derive: F) -> SymbolBatch<T>
    where
        S: AsRef<str>,
        F: Fn(&SymbolRecord) -> Result<T, DataError>,
    {
        let outcome = self.get(symbols);
        let mut failures = outcome.failures;
        let mut values = BTreeMap::new();
        for (symbol, record) in &outcome.records {
            match derive(record) {
                Ok(value) => {
                    values.insert(symbol.clone(), value);
                }
                Err(e) => {
                    failures.insert(symbol.clone(), e);
                }
            }
        }
        SymbolBatch { values, failures }
    }

    /// Caller-facing frames; see [`transform::project`].
    pub fn get_view<S: AsRef<str>>(
        &self,
        symbols: &[S],
        auto_adjust: bool,
    ) -> SymbolBatch<DataFrame> {
        self.get_with(symbols, |record| transform::project(record, auto_adjust))
    }

    pub fn dividends<S: AsRef<str>>(&self, symbols: &[S]) -> SymbolBatch<Vec<CorporateAction>> {
        self.get_with(symbols, actions::dividends)
    }

    pub fn splits<S: AsRef<str>>(&self, symbols: &[S]) -> SymbolBatch<Vec<CorporateAction>> {
        self.get_with(symbols, actions::splits)
    }

    pub fn actions<S: AsRef<str>>(&self, symbols: &[S]) -> SymbolBatch<Vec<ActionRow>> {
        self.get_with(symbols, actions::actions)
    }
}

/// Distinct symbols in first-seen order.
fn dedup_symbols<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.as_ref().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_seen_order() {
        assert_eq!(
            dedup_symbols(&["MSFT", "AAPL", "MSFT", "ED", "AAPL"]),
            vec!["MSFT", "AAPL", "ED"]
        );
    }

    #[test]
    fn into_complete_names_failures() {
        let mut outcome = FetchOutcome::default();
        outcome.failures.insert(
            "BADSYM".into(),
            DataError::SymbolNotFound {
                symbol: "BADSYM".into(),
            },
        );
        let err = outcome.into_complete().unwrap_err();
        assert!(matches!(err, DataError::BatchFailed { ref symbols } if symbols == &["BADSYM"]));
    }

    #[test]
    fn take_returns_symbol_error() {
        let mut outcome = FetchOutcome::default();
        outcome
            .failures
            .insert("X".into(), DataError::DataShape("no rows".into()));
        assert!(matches!(outcome.take("X"), Err(DataError::DataShape(_))));
        assert!(matches!(outcome.take("Y"), Err(DataError::Other(_))));
    }
}
