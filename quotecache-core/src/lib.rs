//! QuoteCache Core: a disk cache for daily market data.
//!
//! - Freshness oracle deciding whether a dataset fetched at one instant is
//!   still complete at another
//! - Parquet cache store with integrity checks and quarantine
//! - Fetch coalescer serving hits from disk and batching misses into one
//!   provider call
//! - Record transforms deriving and projecting adjusted prices
//! - Yahoo Finance provider with retry and circuit breaker

pub mod clock;
pub mod config;
pub mod data;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, QuoteCacheConfig, WritePolicy};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across the fetch pool is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::SymbolRecord>();
        require_sync::<data::SymbolRecord>();
        require_send::<data::ProviderDataset>();
        require_sync::<data::ProviderDataset>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();

        require_send::<data::CacheStore>();
        require_sync::<data::CacheStore>();
        require_send::<data::FetchCoalescer>();
        require_sync::<data::FetchCoalescer>();
        require_send::<data::yahoo::YahooProvider>();
        require_sync::<data::yahoo::YahooProvider>();
        require_send::<data::circuit_breaker::CircuitBreaker>();
        require_sync::<data::circuit_breaker::CircuitBreaker>();

        require_send::<ManualClock>();
        require_sync::<ManualClock>();
    }
}
