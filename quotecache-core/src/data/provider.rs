//! Market-data provider trait and structured error types.
//!
//! The MarketDataProvider trait abstracts over the remote source (Yahoo Finance
//! today) so the coalescer can batch against it and tests can substitute a fake.
//! Providers know nothing about the cache; the coalescer sits above them.

use crate::data::record::SymbolMetadata;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Structured error types for data operations.
///
/// Displayable in CLI output as-is. Symbol-local variants end up in a
/// batch's failure map; infrastructure variants degrade the cache instead.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("fetch failed for '{symbol}': {reason}")]
    ProviderFetch { symbol: String, reason: String },

    #[error("unexpected data shape: {0}")]
    DataShape(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("corrupt cache entry for '{symbol}': {reason}")]
    CorruptEntry { symbol: String, reason: String },

    #[error("no cached data for symbol '{symbol}'")]
    NoCachedData { symbol: String },

    #[error("field '{field}' missing from metadata of '{symbol}'")]
    MissingField { symbol: String, field: String },

    #[error("fetch failed for {} symbol(s): {}", symbols.len(), symbols.join(", "))]
    BatchFailed { symbols: Vec<String> },

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether the error concerns one symbol only, as opposed to the cache,
    /// the network or the provider as a whole.
    pub fn is_symbol_local(&self) -> bool {
        matches!(
            self,
            DataError::InvalidTimestamp { .. }
                | DataError::ProviderFetch { .. }
                | DataError::DataShape(_)
                | DataError::SymbolNotFound { .. }
                | DataError::CorruptEntry { .. }
                | DataError::NoCachedData { .. }
                | DataError::MissingField { .. }
        )
    }
}

/// Everything a provider returns for one symbol.
///
/// `history` is the provider's raw daily frame (`date`, OHLC, `adj_close`,
/// `volume`, `dividends`, `stock_splits`); it has not been normalized yet.
#[derive(Debug, Clone)]
pub struct ProviderDataset {
    pub symbol: String,
    pub history: DataFrame,
    pub metadata: SymbolMetadata,
}

/// Per-symbol results of one batched provider call, keyed by symbol.
pub type BatchFetch = BTreeMap<String, Result<ProviderDataset, DataError>>;

/// Where a record handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Cache,
    Remote,
}

/// Trait for remote market-data providers.
///
/// `fetch_batch` is the only entry point the coalescer uses. The default
/// implementation walks the symbols one by one; providers with a cheaper
/// multi-symbol path override it. Implementations must return exactly one
/// entry per distinct requested symbol and must never let one symbol's failure
/// abort the others.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider, recorded in cache sidecars.
    fn name(&self) -> &str;

    /// Full available daily history plus metadata for one symbol.
    fn fetch_history(&self, symbol: &str) -> Result<ProviderDataset, DataError>;

    /// Fetch several symbols in one call.
    fn fetch_batch(&self, symbols: &[String]) -> BatchFetch {
        symbols
            .iter()
            .map(|symbol| (symbol.clone(), self.fetch_history(symbol)))
            .collect()
    }

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9._=-]`.
///
/// Used for chart URLs and cache directory names. The mapping is injective,
/// so distinct symbols never share an encoded form (`^IRX` -> `%5EIRX`,
/// `_IRX` stays `_IRX`).
pub fn encode_symbol(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for byte in symbol.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'=') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
