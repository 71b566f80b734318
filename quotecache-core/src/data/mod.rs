//! Market data: provider, record transforms, cache store and fetch coalescer.

pub mod actions;
pub mod cache;
pub mod calendar;
pub mod circuit_breaker;
pub mod coalescer;
pub mod freshness;
pub mod provider;
pub mod record;
pub mod schema;
pub mod transform;
pub mod yahoo;

pub use polars::prelude::DataFrame;

pub use cache::{CacheStatus, CacheStore, PutOutcome};
pub use coalescer::{FetchCoalescer, FetchOutcome, SymbolBatch};
pub use freshness::FreshnessPolicy;
pub use provider::{DataError, DataSource, MarketDataProvider, ProviderDataset};
pub use record::{SymbolMetadata, SymbolRecord};
