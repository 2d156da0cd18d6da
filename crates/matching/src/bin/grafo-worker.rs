//! grafo-worker: contact matching and attribute computation over local files.
//!
//! Subcommands:
//! - `match`: match raw pings into contacts for every pending region
//! - `attributes`: compute missing metric periods for every entity
//! - `all`: both, in that order

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;

use grafo_compute::calculators::base_calculators;
use grafo_compute::scheduler::GraphSizeIndex;
use grafo_compute::sources::{CaseTable, ContactSource, EngineContactSource};
use grafo_compute::{standard_calculators, AttributeScheduler, CalculatorOptions, FileWatermarkStore, SchedulerConfig};
use grafo_core::config::load_dotenv;
use grafo_core::telemetry::init_tracing;
use grafo_core::{Config, ContactRecord, EntityRegistry, Ping};
use grafo_engine::{LocalEngine, QueryEngine};
use grafo_matching::{
    CoverageStore, ExecutorSettings, FileCoverageStore, JsonlContactSink, MatchingExecutor, SystemClock,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Contact-graph worker: ping matching and incremental graph attributes.
#[derive(Parser, Debug)]
#[command(name = "grafo-worker", version, about)]
struct Cli {
    /// JSON lines of raw pings loaded before running.
    #[arg(long, env = "GRAFO_PINGS")]
    pings: Option<PathBuf>,

    /// JSON lines of contact rows. Read on start, extended by matching.
    /// Defaults to `{DATA_DIR}/contacts.jsonl`.
    #[arg(long, env = "GRAFO_CONTACTS")]
    contacts: Option<PathBuf>,

    /// Case feed (`{"cases": [...], "distances": [...]}`) enabling the
    /// case and exposure metrics.
    #[arg(long, env = "GRAFO_CASES")]
    cases: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Match,
    Attributes,
    All,
}

// ── Helpers ─────────────────────────────────────────────────────────

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line)
            .with_context(|| format!("invalid row at {}:{}", path.display(), idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

// ── Passes ──────────────────────────────────────────────────────────

fn run_matching(
    config: &Config,
    registry: &EntityRegistry,
    engine: &Arc<LocalEngine>,
    contacts_path: &Path,
) -> anyhow::Result<()> {
    let sink = JsonlContactSink::open(Arc::clone(engine), &config.matching.contacts_table, contacts_path)?;
    let coverage = FileCoverageStore::open(&config.storage.data_dir, &config.storage.inconsistent_dir)?;
    let executor = MatchingExecutor::new(
        Arc::clone(engine) as Arc<dyn QueryEngine>,
        Arc::new(coverage) as Arc<dyn CoverageStore>,
        Arc::new(SystemClock),
        ExecutorSettings::from_config(config),
    )
    .with_sink(Arc::new(sink));
    let reports = executor.run_pending(&registry.region_codes())?;

    info!(
        regions = reports.len(),
        rows = reports.iter().map(|r| r.rows_written).sum::<u64>(),
        path = %contacts_path.display(),
        "Matching pass complete"
    );
    Ok(())
}

fn run_attributes(
    config: &Config,
    registry: &EntityRegistry,
    engine: &Arc<LocalEngine>,
    cases: Option<Arc<CaseTable>>,
) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();
    let scheduler_config = SchedulerConfig::from_attribute_config(&config.attributes, today);
    let store = FileWatermarkStore::open(&config.storage.data_dir.join("attributes"))?;
    let contacts: Arc<dyn ContactSource> = Arc::new(EngineContactSource::new(
        Arc::clone(engine),
        config.matching.contacts_table.as_str(),
        config.matching.raw_table.as_str(),
    ));
    let options = CalculatorOptions::from_config(&config.attributes);

    // Graph sizes first: the size index gates the expensive metrics.
    let mut sizes = AttributeScheduler::new(scheduler_config.clone());
    sizes.register_all(base_calculators(&options, Arc::clone(&contacts)))?;
    sizes.run(registry, &store)?;

    let index = GraphSizeIndex::from_store(&store)?;
    info!(periods = index.len(), "Graph size index built");
    let options = options.with_size_index(Arc::new(index));

    let mut scheduler = AttributeScheduler::new(scheduler_config);
    scheduler.register_all(standard_calculators(&options, contacts, cases))?;
    let summary = scheduler.run(registry, &store)?;

    for (metric, stats) in &summary.metrics.metrics {
        info!(
            metric = %metric,
            computed = stats.computed,
            skipped = stats.skipped,
            null_periods = stats.null_periods,
            avg_ms = stats.avg_duration.as_millis() as u64,
            "Metric summary"
        );
    }
    info!(
        run_id = %summary.run_id,
        computed = summary.metrics.total_computed(),
        skipped = summary.metrics.total_skipped(),
        "Attribute pass complete"
    );
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.validate()?;
    config.log_summary();

    let registry = EntityRegistry::load(&config.storage.registry_path)?;
    let engine = Arc::new(LocalEngine::new());

    if let Some(path) = &cli.pings {
        let pings: Vec<Ping> = read_jsonl(path)?;
        let loaded = engine.insert_pings(&config.matching.raw_table, pings)?;
        info!(rows = loaded, path = %path.display(), "Loaded pings");
    }

    let contacts_path = cli
        .contacts
        .clone()
        .unwrap_or_else(|| config.storage.data_dir.join("contacts.jsonl"));
    if contacts_path.exists() {
        let rows: Vec<ContactRecord> = read_jsonl(&contacts_path)?;
        let loaded = engine.insert_contacts(&config.matching.contacts_table, rows)?;
        info!(rows = loaded, path = %contacts_path.display(), "Loaded contacts");
    }

    let cases = match &cli.cases {
        Some(path) => Some(Arc::new(CaseTable::load(path)?)),
        None => None,
    };

    if matches!(cli.command, Command::Match | Command::All) {
        run_matching(&config, &registry, &engine, &contacts_path)?;
    }
    if matches!(cli.command, Command::Attributes | Command::All) {
        run_attributes(&config, &registry, &engine, cases)?;
    }
    Ok(())
}
