// LogThreads - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Config validation, the reader, the queue and the page cache all refer to
// these names rather than embedding literals.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogThreads";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogThreads";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Chunked reader
// =============================================================================

/// Default read window in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Smallest configurable read window.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024; // 4 KiB

/// Largest configurable read window.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024; // 64 MiB

/// Default retained-chunk memory budget in bytes. Only used as a heuristic
/// for deciding when to evict old chunks.
pub const DEFAULT_MAX_MEMORY_USAGE: u64 = 100 * 1024 * 1024; // 100 MiB

/// Smallest configurable retained-chunk memory budget.
pub const MIN_MAX_MEMORY_USAGE: u64 = 1024 * 1024; // 1 MiB

/// Largest configurable retained-chunk memory budget.
pub const MAX_MAX_MEMORY_USAGE: u64 = 16 * 1024 * 1024 * 1024; // 16 GiB

/// Rough heap cost of one retained entry, used by the memory estimate.
pub const ESTIMATED_BYTES_PER_ENTRY: u64 = 500;

/// Number of most recent chunks kept when the memory budget is exceeded.
pub const RETAINED_CHUNKS_FLOOR: usize = 10;

/// How often a paused reader re-checks its pause/abort flags (ms).
pub const PAUSE_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// Processing queue
// =============================================================================

/// Default number of files processed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Minimum configurable concurrency.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum configurable concurrency.
pub const MAX_CONCURRENCY: usize = 16;

/// How often the CLI polls the queue manager channel (ms).
pub const QUEUE_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// Pattern registry
// =============================================================================

/// Patterns with a priority at or below this value stop extraction once
/// they produce a match.
pub const DEFAULT_EARLY_EXIT_MAX_PRIORITY: i32 = 2;

/// Priority assigned to imported or user-added patterns that omit one.
pub const DEFAULT_CUSTOM_PRIORITY: i32 = 10;

/// Default rule flags: global, case-insensitive.
pub const DEFAULT_PATTERN_FLAGS: &str = "gi";

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Maximum number of patterns a registry may hold (built-in + user).
pub const MAX_PATTERNS: usize = 100;

/// Maximum size of a pattern bundle file in bytes.
pub const MAX_PATTERN_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB

/// Version stamp written into exported pattern bundles.
pub const PATTERN_BUNDLE_VERSION: &str = "1.0";

/// Sample texts used by overlap detection when the caller supplies none.
pub const CONFLICT_SAMPLE_TEXTS: &[&str] = &[
    "task-141 processing",
    "thread-001 started",
    "FileProcessingWorker-3 initialized",
    "sess_abc123xyz789 cache",
    "worker-ABC task execution",
];

// =============================================================================
// Page cache
// =============================================================================

/// Default number of items per cached page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Maximum configurable page size.
pub const MAX_PAGE_SIZE: usize = 100_000;

/// Default number of pages held before LRU eviction.
pub const DEFAULT_MAX_MEMORY_PAGES: usize = 10;

/// Maximum configurable number of retained pages.
pub const MAX_MEMORY_PAGES: usize = 10_000;

/// Default number of pages prefetched on each side of a requested page.
pub const DEFAULT_PRELOAD_PAGES: usize = 2;

/// Maximum configurable prefetch radius.
pub const MAX_PRELOAD_PAGES: usize = 16;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// User pattern bundle file name (stored in the platform config directory).
pub const PATTERNS_FILE_NAME: &str = "patterns.json";
