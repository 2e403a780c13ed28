use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kanjisync::analytics::{Analytics, TimelineFilter};
use kanjisync::config::{Config, API_KEY_ENV};
use kanjisync::model::{ResourceCategory, SrsBucket};
use kanjisync::storage::{AccessMode, Store, StoreError};
use kanjisync::sync::{SyncEngine, SyncOutcome};
use kanjisync::HttpFetcher;

/// Get the config directory path (~/.config/kanjisync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("kanjisync"))
}

#[derive(Parser, Debug)]
#[command(
    name = "kanjisync",
    version,
    about = "Offline cache and study statistics for a spaced-repetition kanji service"
)]
struct Args {
    /// Config file (default: ~/.config/kanjisync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store file, overriding `database_path` from the config
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch changes from the remote service into the local store
    Sync {
        /// Only update this category (assignments, subjects, study_materials, review_statistics, user)
        #[arg(long)]
        category: Option<ResourceCategory>,

        /// Ignore the minimum fetch interval
        #[arg(long)]
        force: bool,
    },
    /// Lessons and reviews available now and soon
    Queue,
    /// Level durations and the projected end of the current level
    Levels,
    /// Started items per SRS bucket
    Srs,
    /// Upcoming reviews
    Timeline {
        #[arg(long)]
        level: Option<u32>,

        /// apprentice, guru, master, enlightened or burned
        #[arg(long)]
        bucket: Option<SrsBucket>,
    },
    /// Search subjects by characters, reading or meaning (`term*` for prefixes)
    Search {
        query: String,

        #[arg(long)]
        limit: Option<u32>,
    },
    /// Delete every cached resource and ledger entry
    Reset,
    /// Rebuild the subject search index
    RebuildSearch,
}

impl Command {
    fn access_mode(&self) -> AccessMode {
        match self {
            Command::Sync { .. } | Command::Reset | Command::RebuildSearch => AccessMode::ReadWrite,
            _ => AccessMode::ReadOnly,
        }
    }
}

fn ensure_config_dir(config_dir: &std::path::Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // The directory holds the API key and the cache: user-only access.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

async fn open_store(path: &std::path::Path, mode: AccessMode) -> Result<Store> {
    match Store::open(path, mode).await {
        Ok(store) => Ok(store),
        Err(StoreError::Locked) => {
            eprintln!(
                "Error: Another kanjisync process is using the store. Please wait for it to finish and try again."
            );
            std::process::exit(1);
        }
        Err(StoreError::Missing(path)) => {
            eprintln!("Error: No local data found at {}", path.display());
            eprintln!();
            eprintln!("Fetch your data first:");
            eprintln!("  kanjisync sync");
            std::process::exit(1);
        }
        Err(e @ StoreError::SchemaMismatch { .. }) => {
            eprintln!("Error: {e}");
            eprintln!("The store was written by an incompatible version. Delete it and sync again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open store: {}", e)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(config = ?config, "Effective configuration");

    let db_path = args
        .db
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("kanjisync.db"));

    let store = open_store(&db_path, args.command.access_mode()).await?;
    if !matches!(args.command, Command::RebuildSearch | Command::Reset) {
        check_search_index(&store).await;
    }

    let result = run(args.command, &config, store.clone()).await;
    store.close().await;
    result
}

async fn run(command: Command, config: &Config, store: Store) -> Result<()> {
    match command {
        Command::Sync { category, force } => sync(config, store, category, force).await,
        Command::Reset => {
            store.reset().await.context("Failed to reset store")?;
            println!("Local data deleted.");
            Ok(())
        }
        Command::RebuildSearch => {
            tracing::info!("Rebuilding search index...");
            let count = store
                .rebuild_search_index()
                .await
                .context("Failed to rebuild search index")?;
            println!("Search index rebuilt: {} subjects indexed", count);
            Ok(())
        }
        Command::Queue => print_queue(&Analytics::new(store)).await,
        Command::Levels => print_levels(&Analytics::new(store)).await,
        Command::Srs => print_srs(&Analytics::new(store)).await,
        Command::Timeline { level, bucket } => {
            print_timeline(&Analytics::new(store), TimelineFilter { level, bucket }).await
        }
        Command::Search { query, limit } => {
            let limit = limit.unwrap_or(config.search_limit);
            print_search(&Analytics::new(store), &query, limit).await
        }
    }
}

/// Warn when the search index drifted from the subjects table.
async fn check_search_index(store: &Store) {
    match store.check_search_consistency().await {
        Ok(report) if report.is_consistent => {
            tracing::debug!("Search index is consistent");
        }
        Ok(report) => {
            tracing::warn!(
                subjects = report.subjects_count,
                indexed = report.indexed_count,
                orphaned = report.orphaned_entries,
                missing = report.missing_entries,
                "Search index inconsistent, run rebuild-search"
            );
            eprintln!(
                "Warning: Search index is out of sync (missing: {}, orphaned: {}). Run `kanjisync rebuild-search` to fix.",
                report.missing_entries, report.orphaned_entries
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to check search index consistency");
        }
    }
}

// ============================================================================
// Sync
// ============================================================================

async fn sync(
    config: &Config,
    store: Store,
    category: Option<ResourceCategory>,
    force: bool,
) -> Result<()> {
    let Some(api_key) = config.api_key() else {
        eprintln!("Error: No API key configured.");
        eprintln!();
        eprintln!("Set {API_KEY_ENV} or add `api_key = \"...\"` to the config file.");
        std::process::exit(1);
    };

    let fetcher = HttpFetcher::new(config.base_url()?, api_key)
        .context("Failed to build HTTP client")?;
    let engine = SyncEngine::new(store, Arc::new(fetcher), config.sync_config());
    let min_interval = if force {
        Duration::ZERO
    } else {
        config.min_fetch_interval()
    };

    let results = match category {
        Some(category) => vec![(category, engine.update(category, min_interval).await)],
        None => engine.update_all(min_interval).await,
    };

    let mut failed = 0;
    for (category, result) in results {
        match result {
            Ok(SyncOutcome::NoData) => println!("{category:<18} up to date"),
            Ok(SyncOutcome::Updated { items }) => println!("{category:<18} {items} updated"),
            Err(e) => {
                failed += 1;
                tracing::warn!(category = %category, kind = %e.kind(), error = %e, "Update failed");
                println!("{category:<18} failed ({}): {e}", e.kind());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} categories failed to update");
    }
    Ok(())
}

// ============================================================================
// Reports
// ============================================================================

async fn print_queue(analytics: &Analytics) -> Result<()> {
    let queue = analytics.study_queue(Utc::now()).await?;
    println!("Lessons available:  {}", queue.lessons_available);
    println!("Reviews available:  {}", queue.reviews_available);
    println!("Next hour:          {}", queue.reviews_available_next_hour);
    println!("Next 24 hours:      {}", queue.reviews_available_next_day);
    match queue.next_review_date {
        Some(at) => println!(
            "Next review:        {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Next review:        -"),
    }
    Ok(())
}

fn format_duration(duration: chrono::Duration) -> String {
    let hours = duration.num_hours();
    format!("{}d {:02}h", hours / 24, hours % 24)
}

async fn print_levels(analytics: &Analytics) -> Result<()> {
    let timeline = analytics.level_timeline(Utc::now()).await?;
    if timeline.levels.is_empty() {
        println!("No started levels.");
        return Ok(());
    }

    for span in &timeline.levels {
        let start = span.start.with_timezone(&Local).format("%Y-%m-%d");
        let end = match span.end {
            Some(end) => end.with_timezone(&Local).format("%Y-%m-%d").to_string(),
            None => "-".to_string(),
        };
        let duration = span.duration().map(format_duration).unwrap_or_default();
        let marker = match (span.projected, span.end_date_based_on_locked_item) {
            (true, true) => " (projected, at the earliest)",
            (true, false) => " (projected)",
            _ => "",
        };
        println!("Level {:>2}  {start} → {end}  {duration}{marker}", span.level);
    }

    if let Some(average) = &timeline.average {
        println!();
        println!(
            "Average over {} levels: {} (± {})",
            average.count,
            format_duration(average.mean),
            format_duration(average.standard_deviation())
        );
    }

    if let Some(progression) = analytics.current_level_progression().await? {
        println!();
        println!(
            "Level {} radicals: {}/{}  kanji: {}/{}",
            progression.level,
            progression.radicals.progress,
            progression.radicals.total,
            progression.kanji.progress,
            progression.kanji.total
        );
    }
    Ok(())
}

async fn print_srs(analytics: &Analytics) -> Result<()> {
    let distribution = analytics.srs_distribution().await?;
    println!("{:<12} {:>8} {:>8} {:>10} {:>8}", "", "radical", "kanji", "vocabulary", "total");
    for (bucket, counts) in distribution.iter() {
        println!(
            "{:<12} {:>8} {:>8} {:>10} {:>8}",
            bucket.as_str(),
            counts.radicals,
            counts.kanji,
            counts.vocabulary,
            counts.total()
        );
    }
    println!("{:<12} {:>37}", "total", distribution.total());
    Ok(())
}

async fn print_timeline(analytics: &Analytics, filter: TimelineFilter) -> Result<()> {
    let timeline = analytics.review_timeline(filter).await?;
    if timeline.is_empty() {
        println!("No scheduled reviews.");
        return Ok(());
    }

    let mut cumulative = 0;
    for entry in &timeline {
        cumulative += entry.counts.total();
        println!(
            "{}  {:>4}  (r {:>3} k {:>3} v {:>3})  total {:>5}",
            entry.available_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.counts.total(),
            entry.counts.radicals,
            entry.counts.kanji,
            entry.counts.vocabulary,
            cumulative
        );
    }
    Ok(())
}

async fn print_search(analytics: &Analytics, query: &str, limit: u32) -> Result<()> {
    let hits = analytics.search_subjects(query, limit).await?;
    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for hit in hits {
        let subject = &hit.subject;
        println!(
            "{:>6}  {:<10} L{:<3} {:<6} {:<12} {}",
            hit.subject_id,
            subject.kind.as_str(),
            subject.level,
            subject.characters.as_deref().unwrap_or("-"),
            subject.primary_reading().unwrap_or(""),
            subject.primary_meaning().unwrap_or("")
        );
    }
    Ok(())
}
