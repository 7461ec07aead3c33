// LogThreads - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. Pattern loading (built-in + user bundle) and CLI overrides
// 4. Queue-driven processing of the given files
// 5. Grouping, filtering and output (summary, JSON or one thread's entries)

use clap::Parser;
use logthreads::app::page_cache::{PageCache, PageCacheConfig, PageData, PageRequest};
use logthreads::app::pattern_store;
use logthreads::app::queue::{JobStatus, QueueConfig, QueueEvent, QueueManager};
use logthreads::app::reader::{EntryIdAllocator, ReaderConfig};
use logthreads::core::bundle::ExportScope;
use logthreads::core::extract::ExtractionPolicy;
use logthreads::core::filter::{apply_thread_filter, ThreadFilter};
use logthreads::core::grouping::GroupAccumulator;
use logthreads::core::model::{GroupingResult, LogEntry, LogLevel, ThreadGroup};
use logthreads::core::pattern::PatternRegistry;
use logthreads::platform::config::{self, AppConfig, PlatformPaths};
use logthreads::util::error::{ConfigError, LogThreadsError, PageError, PatternError, Result};
use logthreads::util::{constants, logging};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// LogThreads - group log lines into threads using ordered regex patterns.
///
/// Reads each file in chunks, extracts a thread identifier from every entry
/// and prints the resulting groups.
#[derive(Parser, Debug)]
#[command(name = "logthreads", version, about)]
struct Cli {
    /// Log files to process.
    #[arg(required_unless_present = "export_patterns")]
    files: Vec<PathBuf>,

    /// User pattern bundle (JSON), merged over the built-in patterns.
    #[arg(short = 'p', long = "patterns")]
    patterns: Option<PathBuf>,

    /// Config file to use instead of the platform default.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Read window in bytes.
    #[arg(long = "chunk-size")]
    chunk_size: Option<usize>,

    /// Files processed at the same time.
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,

    /// Enable a pattern by id (repeatable).
    #[arg(long = "enable", value_name = "ID")]
    enable: Vec<String>,

    /// Disable a pattern by id (repeatable).
    #[arg(long = "disable", value_name = "ID")]
    disable: Vec<String>,

    /// Only show threads whose derived level is one of these (repeatable).
    #[arg(short = 'l', long = "level")]
    level: Vec<String>,

    /// Only show threads whose id, name or messages contain this text.
    #[arg(short = 's', long = "search")]
    search: Option<String>,

    /// Write the effective pattern list to a bundle file.
    #[arg(long = "export-patterns", value_name = "FILE")]
    export_patterns: Option<PathBuf>,

    /// Print the entries of one thread instead of the summary.
    #[arg(short = 't', long = "thread", value_name = "ID")]
    thread: Option<String>,

    /// Page of entries to show with --thread, starting at 1.
    #[arg(long = "page", requires = "thread")]
    page: Option<usize>,

    /// Print the grouping result as JSON.
    #[arg(long = "json")]
    json: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let platform_paths = PlatformPaths::resolve();
    let (app_config, config_warnings) = match cli.config {
        Some(ref path) => config::load_config_file(path),
        None => config::load_config_file(&platform_paths.config_file()),
    };

    logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "LogThreads starting"
    );

    for warning in &config_warnings {
        eprintln!("warning: {warning}");
    }

    match run(&cli, &app_config, &platform_paths) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "LogThreads failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns Ok(false) when every input file failed.
fn run(cli: &Cli, app_config: &AppConfig, platform_paths: &PlatformPaths) -> Result<bool> {
    // Pattern file: CLI override > config > platform default
    let patterns_file = cli
        .patterns
        .clone()
        .or_else(|| app_config.patterns_file.clone())
        .unwrap_or_else(|| platform_paths.patterns_file.clone());

    let (mut registry, diagnostics) = pattern_store::load_patterns(Some(&patterns_file));
    for diag in &diagnostics {
        eprintln!("warning: pattern '{}': {}", diag.pattern_id, diag.message);
    }

    apply_toggles(&mut registry, cli)?;

    if let Some(ref path) = cli.export_patterns {
        pattern_store::save_patterns(&registry, ExportScope::All, path)?;
        eprintln!("Exported {} patterns to {}", registry.len(), path.display());
        if cli.files.is_empty() {
            return Ok(true);
        }
    }

    let filter = build_filter(cli)?;

    let queue_config = QueueConfig {
        reader: ReaderConfig {
            chunk_size: cli
                .chunk_size
                .map(|size| size.clamp(constants::MIN_CHUNK_SIZE, constants::MAX_CHUNK_SIZE))
                .unwrap_or(app_config.chunk_size),
            max_memory_usage: app_config.max_memory_usage,
        },
        concurrency: cli
            .concurrency
            .map(|n| n.clamp(constants::MIN_CONCURRENCY, constants::MAX_CONCURRENCY))
            .unwrap_or(app_config.concurrency),
    };
    let policy = ExtractionPolicy::from_threshold(app_config.early_exit_max_priority);

    let (result, all_failed) = process_files(cli.files.clone(), queue_config, &registry, policy);

    if let Some(ref thread_id) = cli.thread {
        let Some(group) = result.thread_groups.iter().find(|g| &g.thread_id == thread_id) else {
            eprintln!("error: no thread '{thread_id}'");
            return Ok(false);
        };
        print_thread_page(group, cli.page.unwrap_or(1), page_cache_config(app_config))?;
        return Ok(!all_failed);
    }

    let visible = apply_thread_filter(&result.thread_groups, &filter);
    if cli.json {
        let filtered = GroupingResult {
            thread_groups: visible
                .iter()
                .map(|&i| result.thread_groups[i].clone())
                .collect(),
            ..result
        };
        write_json(&filtered)?;
    } else {
        print_summary(&result, &visible);
    }

    Ok(!all_failed)
}

fn apply_toggles(
    registry: &mut PatternRegistry,
    cli: &Cli,
) -> std::result::Result<(), PatternError> {
    let toggles = cli
        .enable
        .iter()
        .map(|id| (id, true))
        .chain(cli.disable.iter().map(|id| (id, false)));
    for (id, enabled) in toggles {
        registry.set_enabled(id, enabled)?;
    }
    for diag in registry.diagnostics() {
        tracing::warn!(pattern_id = %diag.pattern_id, "{}", diag.message);
    }
    Ok(())
}

fn build_filter(cli: &Cli) -> std::result::Result<ThreadFilter, ConfigError> {
    let mut filter = ThreadFilter::default();
    for token in &cli.level {
        let level = LogLevel::from_token(token).ok_or_else(|| ConfigError::ValueOutOfRange {
            field: "--level".to_string(),
            value: token.clone(),
            expected: "trace, debug, info, warn, error or fatal".to_string(),
        })?;
        filter.levels.insert(level);
    }
    if let Some(ref text) = cli.search {
        filter.text_search = text.clone();
    }
    Ok(filter)
}

fn write_json(result: &GroupingResult) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, result)
        .map_err(std::io::Error::from)
        .and_then(|()| writeln!(out))
        .map_err(|source| LogThreadsError::Io {
            path: PathBuf::from("<stdout>"),
            operation: "write JSON",
            source,
        })
}

/// Run the queue on its background thread and group entries as chunks
/// arrive. Returns the grouping and whether every file failed.
fn process_files(
    files: Vec<PathBuf>,
    config: QueueConfig,
    registry: &PatternRegistry,
    policy: ExtractionPolicy,
) -> (GroupingResult, bool) {
    let file_count = files.len();
    let mut manager = QueueManager::new();
    manager.start(files, config, EntryIdAllocator::default());

    let mut accumulator = GroupAccumulator::with_policy(registry, policy);
    let mut outcomes = None;

    while outcomes.is_none() {
        // Sample liveness before draining so a final burst is not missed.
        let finished = !manager.is_running();
        for event in manager.poll_events() {
            match event {
                QueueEvent::Chunk { entries, .. } => accumulator.add_entries(entries),
                QueueEvent::FileCompleted { summary, .. } => {
                    tracing::info!(
                        source = %summary.source,
                        entries = summary.total_entries,
                        chunks = summary.total_chunks,
                        elapsed_ms = summary.processing_time.as_millis() as u64,
                        "File processed"
                    );
                }
                QueueEvent::FileFailed { path, message, .. } => {
                    eprintln!("error: {}: {message}", path.display());
                }
                QueueEvent::AllCompleted { outcomes: done } => outcomes = Some(done),
                _ => {}
            }
        }
        if outcomes.is_none() {
            if finished {
                tracing::warn!("Queue stopped without reporting completion");
                break;
            }
            std::thread::sleep(Duration::from_millis(constants::QUEUE_POLL_INTERVAL_MS));
        }
    }

    let outcomes = outcomes.unwrap_or_default();
    let failed = outcomes
        .iter()
        .filter(|o| o.status != JobStatus::Completed)
        .count();
    tracing::info!(files = file_count, failed, "Processing finished");

    (accumulator.finish(), file_count > 0 && failed == file_count)
}

fn print_summary(result: &GroupingResult, visible: &[usize]) {
    println!(
        "{} threads, {} grouped entries, {} ungrouped entries",
        result.total_threads, result.total_grouped_entries, result.total_ungrouped_entries
    );
    if visible.len() != result.thread_groups.len() {
        println!("showing {} threads after filtering", visible.len());
    }
    println!();

    for &i in visible {
        let group = &result.thread_groups[i];
        let range = match (&group.time_range.start, &group.time_range.end) {
            (Some(start), Some(end)) => format!("{start} .. {end}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<32} {:>6} entries  {:<5}  {:<6}  {}",
            group.thread_id,
            group.entry_count,
            group.log_level.as_str(),
            group.status.as_str(),
            range
        );
    }
}

/// Page cache settings from the `[page_cache]` config section.
fn page_cache_config(app_config: &AppConfig) -> PageCacheConfig {
    PageCacheConfig {
        page_size: app_config.page_size,
        max_memory_pages: app_config.max_memory_pages,
        preload_pages: app_config.preload_pages,
    }
}

/// Print one page (1-based) of a thread's entries through a page cache.
fn print_thread_page(group: &ThreadGroup, page: usize, config: PageCacheConfig) -> Result<()> {
    let entries = &group.entries;
    let cache = PageCache::new(
        config,
        |req: &PageRequest| -> std::result::Result<PageData<LogEntry>, PageError> {
            let start = req.page.saturating_mul(req.page_size).min(entries.len());
            let end = start.saturating_add(req.page_size).min(entries.len());
            Ok(PageData {
                data: entries[start..end].to_vec(),
                total_count: entries.len(),
                has_more: end < entries.len(),
            })
        },
    );

    let page_size = cache.config().page_size;
    let pages = entries.len().div_ceil(page_size).max(1);
    let rows = cache.load_page(page.saturating_sub(1))?;

    println!(
        "{} ({} entries, {}), page {}/{}",
        group.thread_id,
        group.entry_count,
        group.status,
        page,
        pages
    );
    for entry in &rows {
        println!(
            "{}  {:<5}  {}",
            entry.timestamp,
            entry.level.as_str(),
            entry.message
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_config_follows_app_config() {
        let app_config = AppConfig {
            page_size: 25,
            max_memory_pages: 4,
            preload_pages: 0,
            ..AppConfig::default()
        };
        let config = page_cache_config(&app_config);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.max_memory_pages, 4);
        assert_eq!(config.preload_pages, 0);

        let defaults = page_cache_config(&AppConfig::default());
        assert_eq!(defaults.page_size, constants::DEFAULT_PAGE_SIZE);
        assert_eq!(defaults.max_memory_pages, constants::DEFAULT_MAX_MEMORY_PAGES);
        assert_eq!(defaults.preload_pages, constants::DEFAULT_PRELOAD_PAGES);
    }

    #[test]
    fn test_thread_flag_parses_page() {
        let cli = Cli::try_parse_from(["logthreads", "a.log", "--thread", "task-1", "--page", "3"])
            .unwrap();
        assert_eq!(cli.thread.as_deref(), Some("task-1"));
        assert_eq!(cli.page, Some(3));
        assert!(Cli::try_parse_from(["logthreads", "a.log", "--page", "2"]).is_err());
    }
}
