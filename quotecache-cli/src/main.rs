//! QuoteCache CLI: daily history, corporate actions and cache inspection.
//!
//! Commands:
//! - `fetch`: resolve symbols through the cache and print (or export) their history
//! - `dividends` / `splits` / `actions`: corporate actions per symbol
//! - `trading-days`: the trading calendar from the reference symbol
//! - `risk-free-rate`: short-term treasury yield as a fraction
//! - `info`: provider metadata for a symbol
//! - `cache status`: what is on disk and whether it is still fresh

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quotecache_core::data::actions::CorporateAction;
use quotecache_core::data::schema::{self, CLOSE, DIVIDENDS, HIGH, LOW, OPEN, STOCK_SPLITS};
use quotecache_core::data::{calendar, transform, DataError, DataFrame, FetchCoalescer, SymbolBatch};
use quotecache_core::QuoteCacheConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quotecache",
    about = "QuoteCache CLI: daily market data with a freshness-aware disk cache"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Bypass the cache entirely: always fetch, never write.
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daily history for one or more symbols.
    Fetch {
        /// Symbols to fetch (e.g., SPY AAPL ^IRX).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Show raw prices instead of split/dividend adjusted ones.
        #[arg(long, default_value_t = false)]
        raw: bool,

        /// Write all rows to this CSV file instead of printing a summary.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Dividend payments per symbol.
    Dividends {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Stock splits per symbol.
    Splits {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Days with a dividend or a split, per symbol.
    Actions {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Trading days from the calendar reference symbol.
    TradingDays {
        /// Reference symbol (defaults to the configured one).
        #[arg(long)]
        symbol: Option<String>,

        /// Only print the most recent N days.
        #[arg(long)]
        last: Option<usize>,
    },
    /// Current risk-free rate as a fraction.
    RiskFreeRate {
        /// Treasury yield symbol (defaults to the configured one).
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Provider metadata for a symbol.
    Info { symbol: String },
    /// Cache inspection commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, date ranges and freshness.
    Status {
        /// Symbols to report on. Defaults to everything in the cache.
        symbols: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.cache_dir, cli.no_cache)?;
    let coalescer =
        FetchCoalescer::from_config(&config).context("failed to set up the data provider")?;

    let all_ok = match cli.command {
        Commands::Fetch { symbols, raw, csv } => {
            run_fetch(&coalescer, &symbols, raw, csv.as_deref())?
        }
        Commands::Dividends { symbols } => {
            print_events(coalescer.dividends(&symbols), "Dividend")
        }
        Commands::Splits { symbols } => print_events(coalescer.splits(&symbols), "Split"),
        Commands::Actions { symbols } => run_actions(&coalescer, &symbols),
        Commands::TradingDays { symbol, last } => {
            let symbol = symbol.unwrap_or_else(|| config.calendar.reference_symbol.clone());
            let days = calendar::trading_days(&coalescer, &symbol)
                .with_context(|| format!("no trading calendar from '{symbol}'"))?;
            let skip = last.map_or(0, |n| days.len().saturating_sub(n));
            for day in &days[skip..] {
                println!("{day}");
            }
            true
        }
        Commands::RiskFreeRate { symbol } => {
            let symbol = symbol.unwrap_or_else(|| config.calendar.risk_free_symbol.clone());
            let rate = calendar::risk_free_rate(&coalescer, &symbol)
                .with_context(|| format!("no risk-free rate from '{symbol}'"))?;
            println!("{rate:.6}");
            true
        }
        Commands::Info { symbol } => {
            let record = coalescer
                .get_one(&symbol)
                .with_context(|| format!("failed to resolve '{symbol}'"))?;
            println!("{}", serde_json::to_string_pretty(&record.metadata)?);
            true
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { symbols } => run_cache_status(&coalescer, symbols),
        },
    };

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(
    path: Option<&Path>,
    cache_dir: Option<PathBuf>,
    no_cache: bool,
) -> Result<QuoteCacheConfig> {
    let mut config = match path {
        Some(path) => QuoteCacheConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => QuoteCacheConfig::default(),
    };
    if let Some(dir) = cache_dir {
        config.cache.root = dir;
    }
    if no_cache {
        config.cache.enabled = false;
    }
    Ok(config)
}

/// Print each failure; true when there were none.
fn report_failures(failures: &BTreeMap<String, DataError>) -> bool {
    for (symbol, err) in failures {
        eprintln!("Error for {symbol}: {err}");
    }
    failures.is_empty()
}

fn run_fetch(
    coalescer: &FetchCoalescer,
    symbols: &[String],
    raw: bool,
    csv_path: Option<&Path>,
) -> Result<bool> {
    let outcome = coalescer.get(symbols);
    let mut failures = BTreeMap::new();
    let mut views = BTreeMap::new();
    for (symbol, record) in &outcome.records {
        match transform::project(record, !raw) {
            Ok(view) => {
                views.insert(symbol.clone(), view);
            }
            Err(e) => {
                failures.insert(symbol.clone(), e);
            }
        }
    }

    if let Some(path) = csv_path {
        write_csv(path, &outcome.symbols, &views)?;
        println!(
            "Wrote {} symbol(s) to {}",
            views.len(),
            path.display()
        );
    } else {
        println!(
            "{:<10} {:<8} {:<25} {:>8} {:>12}",
            "Symbol", "Source", "Date Range", "Rows", "Last Close"
        );
        println!("{}", "-".repeat(67));
        for symbol in &outcome.symbols {
            let (Some(record), Some(view)) = (outcome.records.get(symbol), views.get(symbol))
            else {
                continue;
            };
            let range = match record.date_range()? {
                Some((first, last)) => format!("{first} to {last}"),
                None => "(empty)".into(),
            };
            let last_close = schema::f64_values(view, CLOSE)?
                .last()
                .map_or_else(|| "-".to_string(), |c| format!("{c:.4}"));
            let source = outcome
                .sources
                .get(symbol)
                .map_or("-".to_string(), |s| format!("{s:?}").to_lowercase());
            println!(
                "{:<10} {:<8} {:<25} {:>8} {:>12}",
                symbol,
                source,
                range,
                record.rows(),
                last_close
            );
        }
    }

    failures.extend(outcome.failures);
    Ok(report_failures(&failures))
}

fn write_csv(path: &Path, order: &[String], views: &BTreeMap<String, DataFrame>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut header = vec!["symbol"];
    header.extend(schema::VIEW_COLUMNS);
    writer.write_record(&header)?;

    for symbol in order {
        let Some(view) = views.get(symbol) else {
            continue;
        };
        for row in view_rows(view)? {
            writer.write_record(std::iter::once(symbol.clone()).chain(row))?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// A projected frame as CSV cells, in `VIEW_COLUMNS` order.
fn view_rows(view: &DataFrame) -> Result<Vec<Vec<String>>> {
    let dates = schema::date_values(view)?;
    let prices = [OPEN, HIGH, LOW, CLOSE]
        .iter()
        .map(|name| schema::f64_values(view, name))
        .collect::<Result<Vec<_>, _>>()?;
    let volume = schema::u64_values(view, schema::VOLUME)?;
    let dividends = schema::f64_values(view, DIVIDENDS)?;
    let splits = schema::f64_values(view, STOCK_SPLITS)?;

    Ok((0..dates.len())
        .map(|i| {
            let mut row = vec![dates[i].to_string()];
            row.extend(prices.iter().map(|column| column[i].to_string()));
            row.push(volume[i].to_string());
            row.push(dividends[i].to_string());
            row.push(splits[i].to_string());
            row
        })
        .collect())
}

fn print_events(batch: SymbolBatch<Vec<CorporateAction>>, label: &str) -> bool {
    for (symbol, events) in &batch.values {
        println!("{symbol}: {} event(s)", events.len());
        for event in events {
            println!("  {}  {label} {}", event.date, event.value);
        }
    }
    report_failures(&batch.failures)
}

fn run_actions(coalescer: &FetchCoalescer, symbols: &[String]) -> bool {
    let batch = coalescer.actions(symbols);
    for (symbol, rows) in &batch.values {
        println!("{symbol}:");
        println!("  {:<12} {:>10} {:>8}", "Date", "Dividend", "Split");
        for row in rows {
            println!("  {:<12} {:>10} {:>8}", row.date, row.dividend, row.split);
        }
    }
    report_failures(&batch.failures)
}

fn run_cache_status(coalescer: &FetchCoalescer, symbols: Vec<String>) -> bool {
    let store = coalescer.store();
    if !store.is_enabled() {
        println!("Cache disabled: {}", store.root().display());
        return true;
    }

    let symbols = if symbols.is_empty() {
        store.cached_symbols()
    } else {
        symbols
    };
    if symbols.is_empty() {
        println!("Cache is empty: {}", store.root().display());
        return true;
    }

    println!("Cache: {}", store.root().display());
    println!();
    println!(
        "{:<10} {:<7} {:<25} {:>7} {:<33}",
        "Symbol", "Fresh", "Date Range", "Rows", "Last Update"
    );
    println!("{}", "-".repeat(86));
    for status in store.status(&symbols) {
        if !status.cached {
            println!("{:<10} (not cached)", status.symbol);
            continue;
        }
        let range = match (status.first_date, status.last_date) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(empty)".into(),
        };
        println!(
            "{:<10} {:<7} {:<25} {:>7} {:<33}",
            status.symbol,
            if status.fresh { "yes" } else { "stale" },
            range,
            status.rows.unwrap_or(0),
            status.last_update.unwrap_or_default()
        );
    }
    true
}
