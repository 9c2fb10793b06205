//! Tickvault CLI — local store, index maintenance and scheduled updates.
//!
//! Commands:
//! - `save` — import a CSV file into the store (merge or overwrite)
//! - `load` — print a stored dataset, optionally restricted to a window
//! - `status` — index summary, or one symbol's availability
//! - `gaps` — missing boundary ranges for a requested window
//! - `verify` — integrity check of one symbol or every indexed symbol
//! - `repair` — rebuild one entry from its file, or the whole index
//! - `cleanup` — drop entries whose dataset file is gone
//! - `classify` — activity scores and tiers
//! - `update` — classify, plan and run a parallel refresh
//! - `estimate` — dry-run duration estimate for an update
//! - `export` — write a stored dataset as CSV or JSON

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tickvault_core::data::{
    read_csv_file, CsvDirFetcher, ExportFormat, RepairOutcome, SyntheticFetcher, VerifyOptions,
};
use tickvault_core::{DatasetStore, Frequency, RowFetcher};
use tickvault_runner::{
    ActivityClassifier, BatchReport, TaskStatus, TickvaultConfig, UpdateScheduler,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tickvault",
    about = "Tickvault — local time-series store with activity-aware updates"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory. Overrides `store.root` from the config.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a CSV file (date,open,high,low,close,volume,...) for one symbol.
    Save {
        symbol: String,

        /// CSV file to import.
        file: PathBuf,

        /// daily, weekly or monthly.
        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Replace the stored dataset instead of merging into it.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Print a stored dataset.
    Load {
        symbol: String,

        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Start date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the index summary, or one symbol's availability.
    Status {
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long, default_value = "daily")]
        frequency: String,
    },
    /// List the ranges of a window not covered by the stored dataset.
    Gaps {
        symbol: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        #[arg(long, default_value = "daily")]
        frequency: String,
    },
    /// Check index entries against their dataset files.
    Verify {
        /// Only this symbol. Defaults to every indexed symbol.
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Also flag series with fewer records than calendar days.
        #[arg(long, default_value_t = false)]
        contiguity: bool,
    },
    /// Rebuild one index entry from its file, or the whole index.
    Repair {
        /// Only this symbol. Defaults to a full rebuild.
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long, default_value = "daily")]
        frequency: String,
    },
    /// Remove index entries whose dataset file no longer exists.
    Cleanup,
    /// Score symbols and assign activity tiers.
    Classify {
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Trading days to score over. Defaults to the configured lookback.
        #[arg(long)]
        lookback: Option<usize>,

        /// Score as of this date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Refresh stale symbols from a row source.
    Update {
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Refresh every symbol regardless of staleness.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Worker count. Defaults to the configured maximum.
        #[arg(long)]
        workers: Option<usize>,

        /// Directory of `{symbol}.csv` or `{frequency}/{symbol}.csv` files.
        #[arg(long, conflicts_with = "synthetic")]
        source_dir: Option<PathBuf>,

        /// Generate deterministic synthetic rows instead of reading files.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Fetch windows end at this date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Estimate how long an update would take, without running it.
    Estimate {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        as_of: Option<String>,
    },
    /// Write a stored dataset to a file.
    Export {
        symbol: String,

        /// csv or json.
        #[arg(long, default_value = "csv")]
        format: String,

        /// Output path. Defaults to `{symbol}.{format}`.
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "daily")]
        frequency: String,
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

    let mut config = match &cli.config {
        Some(path) => TickvaultConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TickvaultConfig::default(),
    };
    if let Some(root) = cli.root {
        config.store.root = root;
    }
    let store = Arc::new(
        DatasetStore::open(&config.store.root)
            .with_context(|| format!("opening store at {}", config.store.root.display()))?,
    );

    match cli.command {
        Commands::Save {
            symbol,
            file,
            frequency,
            overwrite,
        } => run_save(&store, &symbol, &file, parse_frequency(&frequency)?, overwrite),
        Commands::Load {
            symbol,
            frequency,
            start,
            end,
            json,
        } => run_load(
            &store,
            &symbol,
            parse_frequency(&frequency)?,
            parse_opt_date(start.as_deref())?,
            parse_opt_date(end.as_deref())?,
            json,
        ),
        Commands::Status { symbol, frequency } => {
            run_status(&store, symbol.as_deref(), parse_frequency(&frequency)?)
        }
        Commands::Gaps {
            symbol,
            start,
            end,
            frequency,
        } => {
            let frequency = parse_frequency(&frequency)?;
            let ranges = store.index().get_missing_ranges(
                &symbol,
                frequency,
                parse_date(&start)?,
                parse_date(&end)?,
            )?;
            if ranges.is_empty() {
                println!("{symbol}@{frequency}: fully covered");
            }
            for range in ranges {
                println!("{symbol}@{frequency}: missing {range} ({} days)", range.days());
            }
            Ok(())
        }
        Commands::Verify {
            symbol,
            frequency,
            contiguity,
        } => run_verify(
            &store,
            symbol.as_deref(),
            parse_frequency(&frequency)?,
            VerifyOptions {
                check_contiguity: contiguity,
            },
        ),
        Commands::Repair { symbol, frequency } => {
            run_repair(&store, symbol.as_deref(), parse_frequency(&frequency)?)
        }
        Commands::Cleanup => {
            let removed = store.index().cleanup_orphans()?;
            for key in &removed {
                println!("removed orphaned entry {key}");
            }
            println!("{} orphaned entries removed", removed.len());
            Ok(())
        }
        Commands::Classify {
            symbols,
            lookback,
            as_of,
            json,
        } => run_classify(&store, &config, &symbols, lookback, as_of.as_deref(), json),
        Commands::Update {
            symbols,
            force,
            workers,
            source_dir,
            synthetic,
            as_of,
            json,
        } => {
            let fetcher: Arc<dyn RowFetcher> = match (source_dir, synthetic) {
                (Some(dir), false) => Arc::new(CsvDirFetcher::new(dir)),
                (None, true) => Arc::new(SyntheticFetcher::new()),
                _ => bail!("update needs a row source: --source-dir <DIR> or --synthetic"),
            };
            let scheduler = build_scheduler(&store, &config, fetcher, as_of.as_deref())?;
            let workers = workers.unwrap_or(config.scheduler.max_workers);
            let report = scheduler.run(&symbols, force, workers);
            print_batch_report(&report, json)?;
            if report.failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Estimate {
            symbols,
            workers,
            as_of,
        } => {
            // Planning never fetches; any source will do.
            let scheduler = build_scheduler(
                &store,
                &config,
                Arc::new(SyntheticFetcher::new()),
                as_of.as_deref(),
            )?;
            let workers = workers.unwrap_or(config.scheduler.max_workers);
            let estimate = scheduler.estimate(&symbols, workers);
            println!("Tasks:             {}", estimate.total_tasks);
            println!("Skipped (fresh):   {}", estimate.skipped);
            println!("Serial estimate:   {:.1}s", estimate.total_estimate);
            println!(
                "Parallel estimate: {:.1}s ({} workers)",
                estimate.parallel_estimate, estimate.max_workers
            );
            Ok(())
        }
        Commands::Export {
            symbol,
            format,
            output,
            frequency,
        } => {
            let format: ExportFormat = format.parse()?;
            let output =
                output.unwrap_or_else(|| PathBuf::from(format!("{symbol}.{}", format.extension())));
            let count = store.export(&symbol, parse_frequency(&frequency)?, format, &output)?;
            println!("Exported {count} records to {}", output.display());
            Ok(())
        }
    }
}

fn run_save(
    store: &DatasetStore,
    symbol: &str,
    file: &Path,
    frequency: Frequency,
    overwrite: bool,
) -> Result<()> {
    let records = read_csv_file(file)?;
    let outcome = store.save_with_source(symbol, frequency, &records, overwrite, "csv-import")?;
    println!(
        "{symbol}@{frequency}: {} records stored ({} added, {} replaced)",
        outcome.records, outcome.added, outcome.replaced
    );
    Ok(())
}

fn run_load(
    store: &DatasetStore,
    symbol: &str,
    frequency: Frequency,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let Some(records) = store.load(symbol, frequency, start, end)? else {
        bail!("nothing stored for {symbol}@{frequency}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>14}",
        "Date", "Open", "High", "Low", "Close", "Volume"
    );
    println!("{}", "-".repeat(71));
    for r in &records {
        println!(
            "{:<12} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>14}",
            r.date, r.open, r.high, r.low, r.close, r.volume
        );
    }
    println!("{} records", records.len());
    Ok(())
}

fn run_status(store: &DatasetStore, symbol: Option<&str>, frequency: Frequency) -> Result<()> {
    let index = store.index();

    if let Some(symbol) = symbol {
        let availability = index.get_availability(symbol, frequency);
        match (availability.start_date, availability.end_date) {
            (Some(start), Some(end)) if availability.available => {
                println!("{symbol}@{frequency}: {start} to {end}, {} records", availability.record_count);
                if let Some(updated) = availability.last_updated {
                    println!("Last updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
            _ => println!("{symbol}@{frequency}: not stored"),
        }
        return Ok(());
    }

    let summary = index.summary(frequency);
    println!("Store: {}", store.root().display());
    println!("Frequency: {frequency}");
    println!("Symbols: {}", summary.total_symbols);
    println!("Records: {}", summary.total_records);
    if let (Some(earliest), Some(latest)) = (summary.earliest_date, summary.latest_date) {
        println!("Span: {earliest} to {latest}");
    }
    if summary.total_symbols == 0 {
        return Ok(());
    }

    println!();
    println!("{:<10} {:<25} {:>10} {:<20}", "Symbol", "Date Range", "Records", "Updated");
    println!("{}", "-".repeat(68));
    for symbol in index.list_symbols(frequency) {
        if let Some(entry) = index.get_entry(&symbol, frequency) {
            println!(
                "{:<10} {:<25} {:>10} {:<20}",
                symbol,
                format!("{} to {}", entry.start_date, entry.end_date),
                entry.record_count,
                entry.last_updated.format("%Y-%m-%d %H:%M")
            );
        }
    }
    Ok(())
}

fn run_verify(
    store: &DatasetStore,
    symbol: Option<&str>,
    frequency: Frequency,
    options: VerifyOptions,
) -> Result<()> {
    let index = store.index();
    let symbols = match symbol {
        Some(s) => vec![s.to_string()],
        None => index.list_symbols(frequency),
    };

    let mut failed = 0;
    for symbol in &symbols {
        let report = index.verify_integrity_with(symbol, frequency, options);
        if report.passed() {
            println!("{symbol}@{frequency}: ok");
        } else {
            failed += 1;
            println!("{symbol}@{frequency}: FAILED");
            for issue in &report.issues {
                println!("  - {issue}");
            }
        }
    }

    println!("{} checked, {failed} failed", symbols.len());
    if failed > 0 {
        bail!("{failed} of {} datasets failed verification", symbols.len());
    }
    Ok(())
}

fn run_repair(store: &DatasetStore, symbol: Option<&str>, frequency: Frequency) -> Result<()> {
    let index = store.index();

    if let Some(symbol) = symbol {
        match index.repair(symbol, frequency)? {
            RepairOutcome::Rebuilt(entry) => println!(
                "{symbol}@{frequency}: entry rebuilt ({} to {}, {} records)",
                entry.start_date, entry.end_date, entry.record_count
            ),
            RepairOutcome::Removed => println!("{symbol}@{frequency}: stale entry removed"),
            RepairOutcome::NothingStored => println!("{symbol}@{frequency}: nothing stored"),
        }
        return Ok(());
    }

    let report = index.rebuild()?;
    println!(
        "Index rebuilt: {} entries, {} stale entries removed",
        report.rebuilt, report.removed
    );
    for (key, reason) in &report.failed {
        eprintln!("Could not rebuild {key}: {reason}");
    }
    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_classify(
    store: &Arc<DatasetStore>,
    config: &TickvaultConfig,
    symbols: &[String],
    lookback: Option<usize>,
    as_of: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut classifier = ActivityClassifier::new(Arc::clone(store), config.classifier.clone());
    if let Some(date) = parse_opt_date(as_of)? {
        classifier = classifier.with_as_of(date);
    }
    let lookback = lookback.unwrap_or(config.classifier.lookback_days);
    let batch = classifier.classify_batch(symbols, lookback);

    if json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
        return Ok(());
    }

    println!(
        "{:<10} {:>8} {:>9} {:>8} {:>8} {:>8} {:>6}  {}",
        "Symbol", "Total", "Turnover", "Volume", "Vol%", "Obs", "Data", "Tier"
    );
    println!("{}", "-".repeat(74));
    for score in &batch.scores {
        println!(
            "{:<10} {:>8.1} {:>9.1} {:>8.1} {:>8.1} {:>8} {:>6}  {}",
            score.symbol,
            score.total,
            score.sub_scores.turnover,
            score.sub_scores.volume,
            score.sub_scores.volatility,
            score.observations,
            if score.data_sufficient { "ok" } else { "thin" },
            score.tier
        );
    }
    for (symbol, err) in &batch.errors {
        println!("{symbol:<10} unknown: {err}");
    }
    println!();
    println!(
        "active {}, normal {}, inactive {}, unknown {}",
        batch.active.len(),
        batch.normal.len(),
        batch.inactive.len(),
        batch.unknown.len()
    );
    Ok(())
}

fn build_scheduler(
    store: &Arc<DatasetStore>,
    config: &TickvaultConfig,
    fetcher: Arc<dyn RowFetcher>,
    as_of: Option<&str>,
) -> Result<UpdateScheduler> {
    let as_of = parse_opt_date(as_of)?;
    let mut classifier = ActivityClassifier::new(Arc::clone(store), config.classifier.clone());
    if let Some(date) = as_of {
        classifier = classifier.with_as_of(date);
    }
    let mut scheduler = UpdateScheduler::new(
        Arc::clone(store),
        Arc::new(classifier),
        fetcher,
        config.scheduler.clone(),
    );
    if let Some(date) = as_of {
        scheduler = scheduler.with_as_of(date);
    }
    Ok(scheduler)
}

fn print_batch_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let tiers = &report.tier_breakdown;
    println!("Symbols:    {}", report.total_symbols);
    println!("Updated:    {}", report.updated_symbols);
    println!("Skipped:    {}", report.skipped_symbols);
    println!(
        "Results:    {} ok, {} failed, {} cancelled",
        report.successful, report.failed, report.cancelled
    );
    println!(
        "Tiers:      active {}, normal {}, inactive {}, unknown {}",
        tiers.active, tiers.normal, tiers.inactive, tiers.unknown
    );
    println!(
        "Duration:   {:.2}s ({:.1} symbols/s)",
        report.duration_seconds, report.throughput
    );

    for outcome in &report.outcomes {
        match outcome.status {
            TaskStatus::Succeeded => info!(
                symbol = %outcome.symbol,
                records = outcome.records_fetched,
                "refreshed"
            ),
            TaskStatus::Failed | TaskStatus::Cancelled => eprintln!(
                "{} ({}): {:?} {}",
                outcome.symbol,
                outcome.tier,
                outcome.status,
                outcome.error.as_deref().unwrap_or("")
            ),
        }
    }
    Ok(())
}

fn parse_frequency(raw: &str) -> Result<Frequency> {
    Ok(raw.parse::<Frequency>()?)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}' (expected YYYY-MM-DD)"))
}

fn parse_opt_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(parse_date).transpose()
}
