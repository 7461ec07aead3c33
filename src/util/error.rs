// LogThreads - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation between layers.
// All errors preserve the causal chain for diagnostic logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogThreads operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogThreadsError {
    /// Pattern validation, registry editing, or bundle import failed.
    Pattern(PatternError),

    /// Chunked file reading failed.
    Read(ReadError),

    /// Page cache loading failed.
    Page(PageError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LogThreadsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(e) => write!(f, "Pattern error: {e}"),
            Self::Read(e) => write!(f, "Read error: {e}"),
            Self::Page(e) => write!(f, "Page error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LogThreadsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pattern(e) => Some(e),
            Self::Read(e) => Some(e),
            Self::Page(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern errors
// ---------------------------------------------------------------------------

/// Errors related to thread pattern validation and pattern bundles.
#[derive(Debug)]
pub enum PatternError {
    /// The pattern source is empty or whitespace only.
    Empty,

    /// A regex pattern exceeds the maximum allowed length.
    TooLong { length: usize, max_length: usize },

    /// The pattern source does not compile.
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    /// The rule carries a flag the engine does not understand.
    InvalidFlag { flag: char },

    /// A pattern with this id is already registered.
    DuplicateId { id: String },

    /// No pattern with this id is registered.
    NotFound { id: String },

    /// The registry is full.
    TooMany { count: usize, max: usize },

    /// A pattern bundle is structurally unusable.
    InvalidBundle { reason: String },

    /// A pattern bundle is not valid JSON.
    Json { source: serde_json::Error },

    /// I/O error reading or writing a pattern bundle file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Pattern cannot be empty"),
            Self::TooLong { length, max_length } => write!(
                f,
                "Pattern is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::InvalidRegex { source, .. } => {
                write!(f, "Invalid regular expression: {source}")
            }
            Self::InvalidFlag { flag } => {
                write!(f, "Invalid regular expression flag '{flag}'")
            }
            Self::DuplicateId { id } => write!(f, "Pattern id '{id}' is already registered"),
            Self::NotFound { id } => write!(f, "No pattern with id '{id}'"),
            Self::TooMany { count, max } => {
                write!(f, "Too many patterns ({count}), maximum is {max}")
            }
            Self::InvalidBundle { reason } => write!(f, "Invalid file format: {reason}"),
            Self::Json { source } => write!(f, "Pattern bundle is not valid JSON: {source}"),
            Self::Io { path, source } => {
                write!(f, "I/O error on pattern file '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Json { source } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PatternError> for LogThreadsError {
    fn from(e: PatternError) -> Self {
        Self::Pattern(e)
    }
}

// ---------------------------------------------------------------------------
// Read errors
// ---------------------------------------------------------------------------

/// Errors raised while reading a source in chunks. Any of these is fatal to
/// the file being read and to nothing else.
#[derive(Debug)]
pub enum ReadError {
    /// `start()` was called while the reader was still reading or paused.
    AlreadyReading,

    /// The source file could not be opened.
    Open { path: PathBuf, source: io::Error },

    /// Reading a byte window failed.
    Io { offset: u64, source: io::Error },

    /// A complete line was not valid UTF-8.
    InvalidEncoding {
        offset: u64,
        source: std::str::Utf8Error,
    },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyReading => write!(f, "Reader is already processing a file"),
            Self::Open { path, source } => {
                write!(f, "Cannot open '{}': {source}", path.display())
            }
            Self::Io { offset, source } => {
                write!(f, "I/O error reading at byte {offset}: {source}")
            }
            Self::InvalidEncoding { offset, source } => {
                write!(f, "Invalid UTF-8 in line at byte {offset}: {source}")
            }
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::InvalidEncoding { source, .. } => Some(source),
            Self::AlreadyReading => None,
        }
    }
}

impl From<ReadError> for LogThreadsError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

// ---------------------------------------------------------------------------
// Page errors
// ---------------------------------------------------------------------------

/// Errors produced by the progressive page cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// The page loader rejected the request.
    Load { page: usize, message: String },

    /// The request was superseded by a newer one or by a reset.
    /// Never reported through the error callback.
    Cancelled,
}

impl PageError {
    /// Returns true for the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { page, message } => write!(f, "Failed to load page {page}: {message}"),
            Self::Cancelled => write!(f, "Page request was cancelled"),
        }
    }
}

impl std::error::Error for PageError {}

impl From<PageError> for LogThreadsError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogThreadsError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogThreads results.
pub type Result<T> = std::result::Result<T, LogThreadsError>;
