// LogThreads - platform/config.rs
//
// Platform directory resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Resolved platform paths for LogThreads configuration and data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logthreads/ or %APPDATA%\LogThreads\config\)
    pub config_dir: PathBuf,

    /// Default user pattern bundle inside the config directory.
    pub patterns_file: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let patterns_file = config_dir.join(constants::PATTERNS_FILE_NAME);

            tracing::debug!(
                config = %config_dir.display(),
                "Platform paths resolved"
            );

            Self {
                config_dir,
                patterns_file,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            let fallback = PathBuf::from(".");
            Self {
                patterns_file: fallback.join(constants::PATTERNS_FILE_NAME),
                config_dir: fallback,
            }
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored so a newer config file still loads
/// with an older binary.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub reader: ReaderSection,
    pub grouping: GroupingSection,
    pub page_cache: PageCacheSection,
    pub patterns: PatternsSection,
    pub logging: LoggingSection,
}

/// `[reader]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ReaderSection {
    /// Read window in bytes.
    pub chunk_size_bytes: Option<usize>,
    /// Retained-chunk memory budget in bytes.
    pub max_memory_bytes: Option<u64>,
    /// Files processed at the same time.
    pub concurrency: Option<usize>,
}

/// `[grouping]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct GroupingSection {
    /// Highest priority that stops extraction on a match. Negative disables.
    pub early_exit_max_priority: Option<i32>,
}

/// `[page_cache]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PageCacheSection {
    pub page_size: Option<usize>,
    pub max_memory_pages: Option<usize>,
    pub preload_pages: Option<usize>,
}

/// `[patterns]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    /// User pattern bundle (JSON).
    pub file: Option<String>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    // -- Reader --
    pub chunk_size: usize,
    pub max_memory_usage: u64,
    pub concurrency: usize,

    // -- Grouping --
    pub early_exit_max_priority: i32,

    // -- Page cache --
    pub page_size: usize,
    pub max_memory_pages: usize,
    pub preload_pages: usize,

    // -- Patterns --
    /// Overrides the platform default pattern file.
    pub patterns_file: Option<PathBuf>,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            max_memory_usage: constants::DEFAULT_MAX_MEMORY_USAGE,
            concurrency: constants::DEFAULT_CONCURRENCY,
            early_exit_max_priority: constants::DEFAULT_EARLY_EXIT_MAX_PRIORITY,
            page_size: constants::DEFAULT_PAGE_SIZE,
            max_memory_pages: constants::DEFAULT_MAX_MEMORY_PAGES,
            preload_pages: constants::DEFAULT_PRELOAD_PAGES,
            patterns_file: None,
            log_level: None,
            log_file: None,
        }
    }
}

/// Load and validate `config.toml` from the given config directory.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<String>) {
    load_config_file(&config_dir.join(constants::CONFIG_FILE_NAME))
}

/// Load and validate a config file.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// If the file does not exist, returns defaults with no warnings (first run).
/// If the file is unreadable or unparseable, returns defaults with one
/// warning: the application still starts but the user is informed.
pub fn load_config_file(config_path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(source) => {
            let err = ConfigError::Io {
                path: config_path.to_path_buf(),
                source,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let raw: RawConfig = match toml::from_str(&content) {
        Ok(r) => r,
        Err(source) => {
            let err = ConfigError::TomlParse {
                path: config_path.to_path_buf(),
                source,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %config_path.display(), "Loaded config.toml");

    let config = validate(raw, &mut warnings);

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }

    (config, warnings)
}

/// Check every field against named constants, accumulating all warnings.
fn validate(raw: RawConfig, warnings: &mut Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();

    // -- Reader --
    if let Some(v) = in_range(
        "[reader] chunk_size_bytes",
        raw.reader.chunk_size_bytes,
        constants::MIN_CHUNK_SIZE..=constants::MAX_CHUNK_SIZE,
        config.chunk_size,
        warnings,
    ) {
        config.chunk_size = v;
    }
    if let Some(v) = in_range(
        "[reader] max_memory_bytes",
        raw.reader.max_memory_bytes,
        constants::MIN_MAX_MEMORY_USAGE..=constants::MAX_MAX_MEMORY_USAGE,
        config.max_memory_usage,
        warnings,
    ) {
        config.max_memory_usage = v;
    }
    if let Some(v) = in_range(
        "[reader] concurrency",
        raw.reader.concurrency,
        constants::MIN_CONCURRENCY..=constants::MAX_CONCURRENCY,
        config.concurrency,
        warnings,
    ) {
        config.concurrency = v;
    }

    // -- Grouping: any value is meaningful, negative turns early exit off --
    if let Some(threshold) = raw.grouping.early_exit_max_priority {
        config.early_exit_max_priority = threshold;
    }

    // -- Page cache --
    if let Some(v) = in_range(
        "[page_cache] page_size",
        raw.page_cache.page_size,
        1..=constants::MAX_PAGE_SIZE,
        config.page_size,
        warnings,
    ) {
        config.page_size = v;
    }
    if let Some(v) = in_range(
        "[page_cache] max_memory_pages",
        raw.page_cache.max_memory_pages,
        1..=constants::MAX_MEMORY_PAGES,
        config.max_memory_pages,
        warnings,
    ) {
        config.max_memory_pages = v;
    }
    if let Some(v) = in_range(
        "[page_cache] preload_pages",
        raw.page_cache.preload_pages,
        0..=constants::MAX_PRELOAD_PAGES,
        config.preload_pages,
        warnings,
    ) {
        config.preload_pages = v;
    }

    // -- Patterns: file --
    if let Some(file) = raw.patterns.file.filter(|f| !f.trim().is_empty()) {
        config.patterns_file = Some(PathBuf::from(file));
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            let err = ConfigError::ValueOutOfRange {
                field: "[logging] level".to_string(),
                value: level.clone(),
                expected: valid.join(", "),
            };
            warnings.push(format!("{err}. Using default (info)."));
        }
    }

    // -- Logging: file --
    if let Some(file) = raw.logging.file.filter(|f| !f.is_empty()) {
        config.log_file = Some(file);
    }

    config
}

/// Accept `value` if it lies in `range`, otherwise warn and return None.
fn in_range<T>(
    key: &str,
    value: Option<T>,
    range: RangeInclusive<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> Option<T>
where
    T: PartialOrd + Display + Copy,
{
    let value = value?;
    if range.contains(&value) {
        Some(value)
    } else {
        let err = ConfigError::ValueOutOfRange {
            field: key.to_string(),
            value: value.to_string(),
            expected: format!("{}-{}", range.start(), range.end()),
        };
        warnings.push(format!("{err}. Using default ({default})."));
        None
    }
}
