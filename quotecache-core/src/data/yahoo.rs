//! Yahoo Finance data provider.
//!
//! Fetches the full daily history of a symbol from Yahoo's v8 chart API,
//! including adjusted closes, dividend and split events, and the chart `meta`
//! block (used as the symbol's metadata). Handles retries with exponential
//! backoff plus jitter, response parsing, and the circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{encode_symbol, BatchFetch, DataError, MarketDataProvider, ProviderDataset};
use super::record::SymbolMetadata;
use super::schema::{self, ADJ_CLOSE, CLOSE, DIVIDENDS, HIGH, LOW, OPEN, STOCK_SPLITS};
use crate::config::ProviderConfig;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use rand::Rng;
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Longest single wait between attempts, `retry-after` included.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

/// Exponential backoff for `attempt` (1-based), or the server's `retry-after`
/// when that is longer. Never exceeds [`MAX_RETRY_WAIT`].
fn retry_wait(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    let backoff = base.checked_mul(factor).unwrap_or(MAX_RETRY_WAIT);
    retry_after
        .map_or(backoff, |wait| wait.max(backoff))
        .min(MAX_RETRY_WAIT)
}

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<Map<String, Value>>,
    timestamp: Option<Vec<i64>>,
    events: Option<ChartEvents>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// One parsed daily row before it becomes a frame.
#[derive(Debug, Clone)]
struct RawBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    adj_close: f64,
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    pool: rayon::ThreadPool,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, DataError> {
        let breaker = CircuitBreaker::new(
            config.breaker_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        );
        Self::with_circuit_breaker(config, Arc::new(breaker))
    }

    /// Build a provider sharing an existing circuit breaker.
    pub fn with_circuit_breaker(
        config: &ProviderConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_parallel.max(1))
            .thread_name(|i| format!("quotecache-fetch-{i}"))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build fetch pool: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            pool,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Chart API URL for the full daily history of a symbol.
    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}\
             ?range=max&interval=1d&events=div%2Csplits&includeAdjustedClose=true",
            self.base_url,
            encode_symbol(symbol)
        )
    }

    /// Parse the chart API response into a raw frame plus metadata.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<ProviderDataset, DataError> {
        let result = resp.chart.result.ok_or_else(|| chart_error(symbol, resp.chart.error))?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let gmt_offset = data
            .meta
            .as_ref()
            .and_then(|m| m.get("gmtoffset"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let timestamps = data.timestamp.ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);
        let has_adj_close = adj_closes.is_some();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = exchange_date(ts, gmt_offset)?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();
            let adj_close = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            bars.push(RawBar {
                date,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0),
                adj_close: adj_close.unwrap_or(f64::NAN),
            });
        }

        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        let events = data.events.unwrap_or_default();
        let history = bars_to_frame(&bars, has_adj_close, &events, gmt_offset)?;
        let metadata = match data.meta {
            Some(meta) => SymbolMetadata::new(meta.into_iter().collect()),
            None => SymbolMetadata::unavailable("chart response carried no meta block"),
        };

        Ok(ProviderDataset {
            symbol: symbol.to_string(),
            history,
            metadata,
        })
    }

    /// Execute a single HTTP request with retry and circuit breaker logic.
    #[instrument(skip(self), level = "debug")]
    fn fetch_with_retry(&self, symbol: &str) -> Result<ProviderDataset, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = self.chart_url(symbol);
        let mut last_error = None;
        let mut retry_after = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_wait(self.base_delay, attempt, retry_after.take());
                let jitter_cap = self.base_delay.as_millis() as u64 / 2;
                let jitter_ms = rand::thread_rng().gen_range(0..=jitter_cap);
                debug!(symbol, attempt, ?delay, "retrying chart request");
                std::thread::sleep(delay + Duration::from_millis(jitter_ms));
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let hint = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        retry_after = hint.map(Duration::from_secs);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: hint.unwrap_or(60),
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(DataError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(DataError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::ProviderFetch {
                            symbol: symbol.to_string(),
                            reason: format!("HTTP {status}"),
                        });
                        continue;
                    }

                    let chart: ChartResponse = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;

                    let dataset = Self::parse_response(symbol, chart)?;
                    self.circuit_breaker.record_success();
                    debug!(symbol, rows = dataset.history.height(), "chart fetched");
                    return Ok(dataset);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        let err = last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into()));
        warn!(symbol, error = %err, "giving up on chart request");
        Err(err)
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_history(&self, symbol: &str) -> Result<ProviderDataset, DataError> {
        self.fetch_with_retry(symbol)
    }

    /// One symbol goes straight through; larger batches fan out over the
    /// bounded fetch pool. Results are keyed by symbol, so completion order
    /// does not matter, and each symbol's failure stays in its own entry.
    fn fetch_batch(&self, symbols: &[String]) -> BatchFetch {
        if let [symbol] = symbols {
            let mut batch = BTreeMap::new();
            batch.insert(symbol.clone(), self.fetch_with_retry(symbol));
            return batch;
        }

        let results: Vec<(String, Result<ProviderDataset, DataError>)> = self.pool.install(|| {
            symbols
                .par_iter()
                .map(|symbol| (symbol.clone(), self.fetch_with_retry(symbol)))
                .collect()
        });
        results.into_iter().collect()
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn chart_error(symbol: &str, error: Option<ChartError>) -> DataError {
    match error {
        Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => DataError::ResponseFormatChanged("empty result with no error".into()),
    }
}

/// Trading date of a bar timestamp in the exchange's own timezone.
fn exchange_date(ts: i64, gmt_offset: i64) -> Result<NaiveDate, DataError> {
    chrono::DateTime::from_timestamp(ts + gmt_offset, 0)
        .map(|dt| dt.naive_utc().date())
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
}

/// Build the raw provider frame; `adj_close` is omitted when Yahoo sent none.
fn bars_to_frame(
    bars: &[RawBar],
    has_adj_close: bool,
    events: &ChartEvents,
    gmt_offset: i64,
) -> Result<DataFrame, DataError> {
    let mut dividends: HashMap<NaiveDate, f64> = HashMap::new();
    for event in events.dividends.values() {
        *dividends.entry(exchange_date(event.date, gmt_offset)?).or_default() += event.amount;
    }
    let mut splits: HashMap<NaiveDate, f64> = HashMap::new();
    for event in events.splits.values() {
        if event.denominator != 0.0 {
            splits.insert(
                exchange_date(event.date, gmt_offset)?,
                event.numerator / event.denominator,
            );
        }
    }

    let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
    let mut columns = vec![
        schema::date_column(&dates)?,
        schema::f64_column(OPEN, bars.iter().map(|b| b.open).collect()),
        schema::f64_column(HIGH, bars.iter().map(|b| b.high).collect()),
        schema::f64_column(LOW, bars.iter().map(|b| b.low).collect()),
        schema::f64_column(CLOSE, bars.iter().map(|b| b.close).collect()),
        schema::u64_column(schema::VOLUME, bars.iter().map(|b| b.volume).collect()),
        schema::f64_column(
            DIVIDENDS,
            dates.iter().map(|d| dividends.get(d).copied().unwrap_or(0.0)).collect(),
        ),
        schema::f64_column(
            STOCK_SPLITS,
            dates.iter().map(|d| splits.get(d).copied().unwrap_or(0.0)).collect(),
        ),
    ];
    if has_adj_close {
        columns.push(schema::f64_column(
            ADJ_CLOSE,
            bars.iter().map(|b| b.adj_close).collect(),
        ));
    }
    schema::frame(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two trading days around a holiday row, one dividend, one 2:1 split.
    // 1704205800 = 2024-01-02 14:30 UTC, gmtoffset -18000 (New York).
    const CHART_JSON: &str = r#"{
      "chart": {
        "result": [{
          "meta": {"symbol": "ED", "currency": "USD", "gmtoffset": -18000,
                   "regularMarketPrice": 91.25, "exchangeName": "NYQ"},
          "timestamp": [1704205800, 1704292200, 1704378600],
          "events": {
            "dividends": {"1704205800": {"amount": 0.81, "date": 1704205800}},
            "splits": {"1704378600": {"date": 1704378600, "numerator": 2, "denominator": 1, "splitRatio": "2:1"}}
          },
          "indicators": {
            "quote": [{
              "open":   [90.0, null, 45.5],
              "high":   [91.0, null, 46.0],
              "low":    [89.5, null, 45.0],
              "close":  [90.5, null, 45.75],
              "volume": [1200000, null, 2500000]
            }],
            "adjclose": [{"adjclose": [44.85, null, 45.75]}]
          }
        }],
        "error": null
      }
    }"#;

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_wait(base, 1, None), base);
        assert_eq!(retry_wait(base, 3, None), Duration::from_secs(2));
        assert_eq!(retry_wait(base, 40, None), MAX_RETRY_WAIT);
        assert_eq!(retry_wait(base, u32::MAX, None), MAX_RETRY_WAIT);
    }

    #[test]
    fn retry_after_extends_the_wait() {
        let base = Duration::from_millis(500);
        assert_eq!(
            retry_wait(base, 1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        // a shorter hint never undercuts the backoff
        assert_eq!(
            retry_wait(base, 3, Some(Duration::from_millis(10))),
            Duration::from_secs(2)
        );
        assert_eq!(
            retry_wait(base, 1, Some(Duration::from_secs(3600))),
            MAX_RETRY_WAIT
        );
    }

    fn parse(json: &str) -> Result<ProviderDataset, DataError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooProvider::parse_response("ED", resp)
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn parses_quotes_events_and_meta() {
        let dataset = parse(CHART_JSON).unwrap();
        let df = &dataset.history;

        assert_eq!(df.height(), 2, "holiday row skipped");
        assert_eq!(schema::date_values(df).unwrap(), vec![day(1, 2), day(1, 4)]);
        assert_eq!(schema::f64_values(df, CLOSE).unwrap(), vec![90.5, 45.75]);
        assert_eq!(schema::f64_values(df, ADJ_CLOSE).unwrap(), vec![44.85, 45.75]);
        assert_eq!(schema::f64_values(df, DIVIDENDS).unwrap(), vec![0.81, 0.0]);
        assert_eq!(schema::f64_values(df, STOCK_SPLITS).unwrap(), vec![0.0, 2.0]);
        assert_eq!(dataset.metadata.str_field("currency"), Some("USD"));
        assert_eq!(dataset.metadata.f64_field("regularMarketPrice"), Some(91.25));
    }

    #[test]
    fn missing_adjclose_block_omits_column() {
        let json = CHART_JSON.replace(
            r#""adjclose": [{"adjclose": [44.85, null, 45.75]}]"#,
            r#""unadjusted": []"#,
        );
        let dataset = parse(&json).unwrap();
        assert!(!schema::has_column(&dataset.history, ADJ_CLOSE));
    }

    #[test]
    fn not_found_error_maps_to_symbol_not_found() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse(json), Err(DataError::SymbolNotFound { .. })));
    }

    #[test]
    fn other_chart_error_is_format_change() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input"}}}"#;
        assert!(matches!(parse(json), Err(DataError::ResponseFormatChanged(_))));
    }

    #[test]
    fn symbols_are_percent_encoded() {
        assert_eq!(encode_symbol("^IRX"), "%5EIRX");
        assert_eq!(encode_symbol("BRK-B"), "BRK-B");
        assert_eq!(encode_symbol("EURUSD=X"), "EURUSD=X");
    }

    #[test]
    fn chart_url_requests_full_history_with_events() {
        let provider = YahooProvider::new(&ProviderConfig {
            base_url: "http://localhost:9/".into(),
            ..ProviderConfig::default()
        })
        .unwrap();
        let url = provider.chart_url("^IRX");
        assert!(url.starts_with("http://localhost:9/v8/finance/chart/%5EIRX?"));
        assert!(url.contains("range=max"));
        assert!(url.contains("events=div%2Csplits"));
    }
}
