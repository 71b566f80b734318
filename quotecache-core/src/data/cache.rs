//! On-disk cache of normalized daily records, one entry per symbol.
//!
//! Layout: `{root}/symbol={SYMBOL}/history.parquet` + `meta.json`
//!
//! - Writes are atomic per file (write to .tmp, rename into place).
//! - `meta.json` is written last and acts as the commit marker: an entry
//!   without it does not exist.
//! - The sidecar carries `last_update` (RFC 3339 with offset) and a BLAKE3
//!   hash of the parquet bytes, checked on every read.
//! - Corrupt entries are quarantined (`{file}.quarantined`) and reported as misses.
//! - Any I/O failure on the root disables caching for this instance; callers
//!   keep working against the provider.
//!
//! Symbol directory names are percent-encoded (`^IRX` -> `symbol=%5EIRX`), one
//! directory per distinct symbol. A sidecar naming a different symbol (a
//! case-folding filesystem, a hand-edited root) reads as a miss. There is no
//! locking: concurrent writers to the same root are best-effort, the last
//! rename wins.

use super::freshness::{parse_aware_timestamp, FreshnessPolicy};
use super::provider::{encode_symbol, DataError};
use super::record::{SymbolMetadata, SymbolRecord};
use super::schema;
use crate::clock::Clock;
use crate::config::{CacheConfig, WritePolicy};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const HISTORY_FILE: &str = "history.parquet";
pub const META_FILE: &str = "meta.json";

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub symbol: String,
    /// RFC 3339 with an explicit offset; naive values are treated as corrupt.
    pub last_update: String,
    pub rows: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_hash: String,
    pub source: String,
    #[serde(default)]
    pub metadata: SymbolMetadata,
}

/// What a `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    Replaced,
    /// An entry already existed and the write policy kept it.
    SkippedExisting,
    /// Caching is (or just became) disabled; nothing was written.
    Disabled,
}

/// Cache status for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub cached: bool,
    pub fresh: bool,
    pub last_update: Option<String>,
    pub rows: Option<usize>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub source: Option<String>,
}

impl CacheStatus {
    fn missing(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            cached: false,
            fresh: false,
            last_update: None,
            rows: None,
            first_date: None,
            last_date: None,
            source: None,
        }
    }
}

/// The record store.
pub struct CacheStore {
    root: PathBuf,
    enabled: AtomicBool,
    write_policy: WritePolicy,
    policy: FreshnessPolicy,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open a store; the root is created here, once. If that fails the store
    /// comes up disabled.
    pub fn new(config: &CacheConfig, policy: FreshnessPolicy, clock: Arc<dyn Clock>) -> Self {
        let store = Self {
            root: config.root.clone(),
            enabled: AtomicBool::new(config.enabled),
            write_policy: config.write_policy,
            policy,
            clock,
        };

        if !config.enabled {
            info!("cache disabled by configuration");
        } else if let Err(e) = fs::create_dir_all(&store.root) {
            store.disable(&format!(
                "cannot create cache root {}: {e}",
                store.root.display()
            ));
        }
        store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Turn caching off for the rest of this instance's life. Logged once.
    pub fn disable(&self, reason: &str) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            warn!(root = %self.root.display(), reason, "disabling cache");
        }
    }

    /// Directory for a symbol: `{root}/symbol={ENCODED}/`
    pub fn entry_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("symbol={}", encode_symbol(symbol)))
    }

    fn history_path(&self, symbol: &str) -> PathBuf {
        self.entry_dir(symbol).join(HISTORY_FILE)
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.entry_dir(symbol).join(META_FILE)
    }

    /// Whether a committed entry exists, fresh or not.
    pub fn contains(&self, symbol: &str) -> bool {
        self.is_enabled() && self.meta_path(symbol).is_file()
    }

    /// The cached record for `symbol`, if present and fresh at the current clock time.
    #[instrument(skip(self), level = "debug")]
    pub fn exists_and_fresh(&self, symbol: &str) -> Option<SymbolRecord> {
        if !self.is_enabled() {
            return None;
        }

        let (meta, last_update) = match self.read_meta(symbol) {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                self.handle_read_error(symbol, e);
                return None;
            }
        };

        let now = self.clock.now();
        if !self.policy.is_fresh(&last_update, &now) {
            debug!(symbol, last_update = %meta.last_update, "cache entry stale");
            return None;
        }

        match self.read_dataset(symbol, &meta) {
            Ok(dataset) => {
                debug!(symbol, rows = meta.rows, "cache hit");
                Some(SymbolRecord::new(symbol, dataset, meta.metadata, last_update))
            }
            Err(e) => {
                self.handle_read_error(symbol, e);
                None
            }
        }
    }

    /// Read an entry regardless of freshness.
    pub fn load(&self, symbol: &str) -> Result<SymbolRecord, DataError> {
        if !self.is_enabled() {
            return Err(DataError::CacheUnavailable(format!(
                "cache at {} is disabled",
                self.root.display()
            )));
        }

        let result = self.read_meta(symbol).and_then(|found| {
            let (meta, last_update) = found.ok_or_else(|| DataError::NoCachedData {
                symbol: symbol.to_string(),
            })?;
            let dataset = self.read_dataset(symbol, &meta)?;
            Ok(SymbolRecord::new(symbol, dataset, meta.metadata, last_update))
        });

        if let Err(DataError::CorruptEntry { reason, .. }) = &result {
            self.quarantine(symbol, reason);
        }
        result
    }

    /// Store a record fetched from an unnamed source.
    pub fn put(&self, symbol: &str, record: &SymbolRecord) -> Result<PutOutcome, DataError> {
        self.put_from(symbol, record, "unknown")
    }

    /// Store a record, subject to the write policy.
    ///
    /// I/O failures disable the store and report [`PutOutcome::Disabled`];
    /// only a record that cannot be encoded is an error.
    #[instrument(skip(self, record), fields(rows = record.rows()))]
    pub fn put_from(
        &self,
        symbol: &str,
        record: &SymbolRecord,
        source: &str,
    ) -> Result<PutOutcome, DataError> {
        if !self.is_enabled() {
            return Ok(PutOutcome::Disabled);
        }

        let existed = self.meta_path(symbol).is_file();
        if existed {
            match self.write_policy {
                WritePolicy::WriteOnce => {
                    debug!(symbol, "entry exists; write-once keeps it");
                    return Ok(PutOutcome::SkippedExisting);
                }
                WritePolicy::ReplaceStale => {
                    if let Ok(Some((_, last_update))) = self.read_meta(symbol) {
                        if self.policy.is_fresh(&last_update, &self.clock.now()) {
                            debug!(symbol, "entry still fresh; keeping it");
                            return Ok(PutOutcome::SkippedExisting);
                        }
                    }
                }
            }
        }

        let bytes = encode_parquet(&record.dataset)?;
        let (first_date, last_date) = record.date_range()?.unzip();
        let meta = EntryMeta {
            symbol: symbol.to_string(),
            last_update: record
                .last_update
                .to_rfc3339_opts(SecondsFormat::Micros, false),
            rows: record.rows(),
            first_date,
            last_date,
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            source: source.to_string(),
            metadata: record.metadata.clone(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| DataError::Other(format!("meta serialization: {e}")))?;

        match self.write_entry(symbol, &bytes, &meta_json, existed) {
            Ok(()) => {
                debug!(symbol, source, replaced = existed, "cache entry written");
                Ok(if existed {
                    PutOutcome::Replaced
                } else {
                    PutOutcome::Written
                })
            }
            Err(e) => {
                self.disable(&format!("write for {symbol} failed: {e}"));
                Ok(PutOutcome::Disabled)
            }
        }
    }

    /// Status of each requested symbol, in request order.
    pub fn status<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<CacheStatus> {
        let now = self.clock.now();
        symbols
            .iter()
            .map(|symbol| {
                let symbol = symbol.as_ref();
                if !self.is_enabled() {
                    return CacheStatus::missing(symbol);
                }
                match self.read_meta(symbol) {
                    Ok(Some((meta, last_update))) => CacheStatus {
                        symbol: symbol.to_string(),
                        cached: true,
                        fresh: self.policy.is_fresh(&last_update, &now),
                        last_update: Some(meta.last_update),
                        rows: Some(meta.rows),
                        first_date: meta.first_date,
                        last_date: meta.last_date,
                        source: Some(meta.source),
                    },
                    _ => CacheStatus::missing(symbol),
                }
            })
            .collect()
    }

    /// Symbols with a committed entry, as recorded in their sidecars, sorted.
    pub fn cached_symbols(&self) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                self.disable(&format!("cannot list cache root: {e}"));
                return Vec::new();
            }
        };

        let mut symbols: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("symbol="))
            .filter_map(|entry| fs::read(entry.path().join(META_FILE)).ok())
            .filter_map(|bytes| serde_json::from_slice::<EntryMeta>(&bytes).ok())
            .map(|meta| meta.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Sidecar plus its parsed `last_update`; `None` when no entry is committed.
    fn read_meta(&self, symbol: &str) -> Result<Option<(EntryMeta, DateTime<Utc>)>, DataError> {
        let bytes = match fs::read(self.meta_path(symbol)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DataError::CacheUnavailable(format!("read {META_FILE}: {e}"))),
        };

        let meta: EntryMeta = serde_json::from_slice(&bytes).map_err(|e| corrupt(symbol, e))?;
        if meta.symbol != symbol {
            debug!(symbol, stored = %meta.symbol, "entry belongs to another symbol");
            return Ok(None);
        }
        let last_update =
            parse_aware_timestamp(&meta.last_update).map_err(|e| corrupt(symbol, e))?;
        Ok(Some((meta, last_update)))
    }

    fn read_dataset(&self, symbol: &str, meta: &EntryMeta) -> Result<DataFrame, DataError> {
        let bytes = match fs::read(self.history_path(symbol)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(corrupt(symbol, "history file missing"))
            }
            Err(e) => {
                return Err(DataError::CacheUnavailable(format!("read {HISTORY_FILE}: {e}")))
            }
        };

        let hash = blake3::hash(&bytes).to_hex().to_string();
        if hash != meta.data_hash {
            return Err(corrupt(symbol, "data hash mismatch"));
        }

        let df = ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| corrupt(symbol, format!("read parquet: {e}")))?;
        schema::validate_canonical(&df).map_err(|e| corrupt(symbol, e))?;
        if df.height() != meta.rows {
            return Err(corrupt(
                symbol,
                format!("expected {} rows, found {}", meta.rows, df.height()),
            ));
        }
        Ok(df)
    }

    fn handle_read_error(&self, symbol: &str, error: DataError) {
        match error {
            DataError::CorruptEntry { reason, .. } => self.quarantine(symbol, &reason),
            other => self.disable(&other.to_string()),
        }
    }

    /// Move a bad entry's files aside so the next put starts clean.
    fn quarantine(&self, symbol: &str, reason: &str) {
        warn!(symbol, reason, "quarantining corrupt cache entry");
        for name in [META_FILE, HISTORY_FILE] {
            let path = self.entry_dir(symbol).join(name);
            if path.exists() {
                let target = path.with_file_name(format!("{name}.quarantined"));
                if let Err(e) = fs::rename(&path, &target) {
                    warn!(path = %path.display(), error = %e, "quarantine rename failed");
                }
            }
        }
    }

    fn write_entry(
        &self,
        symbol: &str,
        parquet: &[u8],
        meta_json: &[u8],
        replacing: bool,
    ) -> std::io::Result<()> {
        fs::create_dir_all(self.entry_dir(symbol))?;
        let meta_path = self.meta_path(symbol);
        if replacing {
            // uncommit first so a crash mid-write leaves a miss, not a mismatch
            fs::remove_file(&meta_path)?;
        }
        write_atomic(&self.history_path(symbol), parquet)?;
        write_atomic(&meta_path, meta_json)
    }
}

fn corrupt(symbol: &str, reason: impl std::fmt::Display) -> DataError {
    DataError::CorruptEntry {
        symbol: symbol.to_string(),
        reason: reason.to_string(),
    }
}

fn encode_parquet(df: &DataFrame) -> Result<Vec<u8>, DataError> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df.clone())
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}
