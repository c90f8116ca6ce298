use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flexi_logger::{DeferredNow, Logger};
use log::Record;
use org_reputation::cache::{CacheStore, TomlCacheStore};
use org_reputation::config::{self, EngineConfig};
use org_reputation::ledger::JournalLedger;
use org_reputation::reconciler::{self, Reconciler, ReconcilerConfig};
use org_reputation::source::{self, ContributionSource, JsonFileSource, StaticSource};
use org_reputation::{scaler, scorer, OrgStatus, ReputationEngine, SyncService};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "org-reputation")]
#[command(about = "Score contributor reputation per organization and attest it to a ledger")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute per-organization scores and the overall score
    Score {
        #[arg(short, long)]
        user: String,
        /// Contribution export to read instead of <data_dir>/<user>.json
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a reconciliation pass into the ledger journal
    Sync {
        #[arg(short, long)]
        user: String,
        /// Developer wallet address recorded in each attestation
        #[arg(short, long)]
        address: String,
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Print the planned write intents without submitting them
        #[arg(long)]
        dry_run: bool,
    },

    /// List cached ledger indexes of a user
    Cache {
        #[arg(short, long)]
        user: String,
    },

    /// Print the effective config, or write the default one
    Config {
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _logger = Logger::try_with_env_or_str(level)
        .context("invalid log specification")?
        .log_to_stderr()
        .format(log_format)
        .start()
        .context("starting logger")?;

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load_or_default(&config_path)?;

    match cli.command {
        Command::Score { user, input, json } => cmd_score(&config, &user, input, json),
        Command::Sync {
            user,
            address,
            input,
            dry_run,
        } => cmd_sync(&config, &user, &address, input, dry_run),
        Command::Cache { user } => cmd_cache(&config, &user),
        Command::Config { init } => cmd_config(&config_path, &config, init),
    }
}

fn log_format(w: &mut dyn std::io::Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "[{}] {:<5} {}",
        now.format("%Y-%m-%dT%H:%M:%S"),
        record.level(),
        record.args()
    )
}

/// `--input` wins over the data directory.
fn contribution_source(
    config: &EngineConfig,
    user: &str,
    input: Option<PathBuf>,
) -> Result<Arc<dyn ContributionSource>> {
    match input {
        Some(path) => {
            let records = source::parse_export(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            Ok(Arc::new(StaticSource::new().with_user(user, records)))
        }
        None => Ok(Arc::new(JsonFileSource::new(&config.data_dir))),
    }
}

fn cmd_score(config: &EngineConfig, user: &str, input: Option<PathBuf>, json: bool) -> Result<()> {
    let engine = ReputationEngine::from_config(contribution_source(config, user, input)?, config);
    let report = engine.compute(user)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "=== Reputation: {} ({} / {}) ===\n",
        report.user,
        report.overall_score,
        scorer::OVERALL_MAX
    );
    if report.organizations.is_empty() {
        println!("No contributions found.");
        return Ok(());
    }
    println!(
        "{:<24} {:>6}  {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}  {:>4} {:>6}",
        "organization", "total", "repo", "ten", "lang", "qual", "oss", "cons", "PRs", "merged"
    );
    for org in &report.organizations {
        let b = &org.breakdown;
        println!(
            "{:<24} {:>6.2}  {:>5.2} {:>5.2} {:>5.2} {:>5.2} {:>5.2} {:>5.2}  {:>4} {:>6}",
            org.org_name,
            org.total_score,
            b.repo_activity,
            b.tenure,
            b.language_stack,
            b.quality,
            b.oss_contribution,
            b.consistency,
            org.metrics.total_prs,
            org.metrics.merged_prs
        );
    }
    Ok(())
}

fn cmd_sync(
    config: &EngineConfig,
    user: &str,
    address: &str,
    input: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let engine = ReputationEngine::from_config(contribution_source(config, user, input)?, config);
    let cache = Arc::new(TomlCacheStore::new(&config.cache_dir));

    if dry_run {
        let report = engine.compute(user)?;
        let cached = cache.read_cache(user)?;
        let timestamp_ms = report.computed_at.timestamp_millis().max(0) as u64;
        let intents = reconciler::plan_batch(&report.organizations, address, timestamp_ms, &cached);
        println!("{}", serde_json::to_string_pretty(&intents)?);
        eprintln!("{} write intents planned (dry run, nothing submitted)", intents.len());
        return Ok(());
    }

    let ledger = Arc::new(JournalLedger::open(&config.journal_path)?);
    let reconciler = Reconciler::new(ledger, cache, ReconcilerConfig::from(config));
    let service = SyncService::new(engine, reconciler);
    let result = service.sync(user, address)?;
    let batch = &result.batch;

    println!("=== Sync: {} (overall {}) ===\n", user, result.report.overall_score);
    for o in &batch.outcomes {
        let detail = match (&o.status, &o.failure) {
            (OrgStatus::Failed, Some(f)) => format!("{}: {}", f.kind, f.reason),
            (OrgStatus::Skipped, Some(f)) => f.kind.to_string(),
            (OrgStatus::Completed, _) => {
                let prev = o
                    .previous_score
                    .map(|p| format!("{} → ", p))
                    .unwrap_or_default();
                let stale = o
                    .stale_index
                    .map(|i| format!(" (stale index {} replaced)", i))
                    .unwrap_or_default();
                let unchanged = if o.changed { "" } else { " unchanged" };
                format!(
                    "index {} score {}{}{}{}",
                    o.ledger_index.unwrap_or_default(),
                    prev,
                    o.new_score,
                    unchanged,
                    stale
                )
            }
            _ => String::new(),
        };
        println!("[{:9}] {:<24} {}", o.status.to_string(), o.org_name, detail);
    }
    println!(
        "\n{} created, {} updated, {} failed, {} skipped",
        batch.created(),
        batch.updated(),
        batch.failed(),
        batch.skipped()
    );

    if batch.halted {
        anyhow::bail!("pass halted after {} failures", batch.failed());
    }
    if batch.failed() > 0 {
        anyhow::bail!("{} organizations failed", batch.failed());
    }
    Ok(())
}

fn cmd_cache(config: &EngineConfig, user: &str) -> Result<()> {
    let store = TomlCacheStore::new(&config.cache_dir);
    let entries = store.read_cache(user)?;

    println!("=== Attestation cache: {} ({} entries) ===\n", user, entries.len());
    for (org, e) in &entries {
        println!(
            "{:<24} index {:<6} score {:<3} ({:.2})  updated {}",
            org,
            e.ledger_index,
            e.last_score,
            scaler::unscale(e.last_score),
            e.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn cmd_config(path: &Path, config: &EngineConfig, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        config::save(path, &EngineConfig::default())?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
