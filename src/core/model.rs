// LogThreads - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies.
//
// These types are the shared vocabulary across all layers.

use crate::util::constants;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Log Entry (output of the line parser)
// =============================================================================

/// A single parsed log line.
///
/// Created once by the parser and never mutated afterwards. Aggregators and
/// caches hold clones; the `id` ties the copies back together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique within one processing session.
    pub id: u64,

    /// Leading timestamp text exactly as it appeared in the line.
    pub timestamp: String,

    /// Normalised level. `INFO` when the line carried no level token.
    pub level: LogLevel,

    /// Bracketed origin tag (class/file name) or `"Unknown"`.
    pub source: String,

    /// The line with the timestamp prefix removed, trimmed.
    pub message: String,

    /// The original, unmodified line.
    pub raw_line: String,

    /// Byte offset of the line start within its source.
    pub offset: u64,
}

impl LogEntry {
    /// The full original line. Alias of `raw_line`.
    pub fn full_message(&self) -> &str {
        &self.raw_line
    }

    /// Text the identifier extractor searches: message, source, and full
    /// line joined by single spaces.
    pub fn search_text(&self) -> String {
        let mut text =
            String::with_capacity(self.message.len() + self.source.len() + self.raw_line.len() + 2);
        text.push_str(&self.message);
        text.push(' ');
        text.push_str(&self.source);
        text.push(' ');
        text.push_str(&self.raw_line);
        text
    }

    /// The timestamp parsed as a date, or `None` if it is not a valid date.
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        crate::core::parser::parse_timestamp(&self.timestamp)
    }
}

// =============================================================================
// Log level
// =============================================================================

/// Level vocabulary, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Returns all variants, least severe first.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Fatal,
        ]
    }

    /// Canonical uppercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Case-insensitive lookup of a level token. `WARNING` maps to `Warn`.
    pub fn from_token(token: &str) -> Option<LogLevel> {
        match token.to_ascii_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "FATAL" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Thread patterns
// =============================================================================

/// A regular expression rule in tagged form: source text plus flags.
///
/// Deserialises from either a bare string (flags default to `"gi"`) or a
/// `{ "source": ..., "flags": ... }` object. Always serialises as the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PatternRuleRepr")]
pub struct PatternRule {
    pub source: String,
    pub flags: String,
}

impl PatternRule {
    /// Rule with the default flags (global, case-insensitive).
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: constants::DEFAULT_PATTERN_FLAGS.to_string(),
        }
    }

    /// Rule with explicit flags.
    pub fn with_flags(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }

    /// True when the source is empty or whitespace only.
    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternRuleRepr {
    Source(String),
    Full {
        source: String,
        #[serde(default = "default_flags")]
        flags: String,
    },
}

fn default_flags() -> String {
    constants::DEFAULT_PATTERN_FLAGS.to_string()
}

impl From<PatternRuleRepr> for PatternRule {
    fn from(repr: PatternRuleRepr) -> Self {
        match repr {
            PatternRuleRepr::Source(source) => PatternRule::new(source),
            PatternRuleRepr::Full { source, flags } => PatternRule { source, flags },
        }
    }
}

/// One thread identification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPattern {
    /// Stable unique identifier.
    pub id: String,

    /// Human label.
    pub name: String,

    /// The rule itself. May be empty or invalid; the registry decides.
    pub pattern: PatternRule,

    #[serde(default)]
    pub description: String,

    /// Disabled patterns never take part in extraction.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lower is evaluated first; ties keep registration order.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// True for user-added patterns, false for built-ins.
    #[serde(default)]
    pub is_custom: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    constants::DEFAULT_CUSTOM_PRIORITY
}

/// A non-fatal problem with one registered pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDiagnostic {
    /// Id of the offending pattern (empty when the entry had none).
    pub pattern_id: String,
    pub message: String,
}

// =============================================================================
// Extraction and grouping results
// =============================================================================

/// One identifier found in an entry's search text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierMatch {
    /// The matched substring, used verbatim as the grouping key.
    pub identifier: String,

    /// Pattern that produced the match.
    pub pattern: Arc<ThreadPattern>,

    /// Byte index of the first occurrence of `identifier` in the search text.
    pub position: usize,
}

/// Derived group status. "Completed" is a presentation concept and is not
/// produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Active,
    Error,
}

impl ThreadStatus {
    /// Lowercase label, matching the serialised form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Earliest and latest timestamps seen in a group.
///
/// Only timestamps that parse as dates take part; the raw strings are kept
/// for display and the parsed values for comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(skip)]
    pub(crate) start_at: Option<NaiveDateTime>,
    #[serde(skip)]
    pub(crate) end_at: Option<NaiveDateTime>,
}

impl TimeRange {
    /// Parsed lower bound.
    pub fn start_at(&self) -> Option<NaiveDateTime> {
        self.start_at
    }

    /// Parsed upper bound.
    pub fn end_at(&self) -> Option<NaiveDateTime> {
        self.end_at
    }
}

/// Entries sharing one extracted identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadGroup {
    pub thread_id: String,
    pub thread_name: String,

    /// The match that created this group.
    pub identifier: IdentifierMatch,

    /// Members in processing order.
    pub entries: Vec<LogEntry>,

    /// Always equal to `entries.len()`.
    pub entry_count: usize,

    /// Distinct levels seen.
    pub log_levels: BTreeSet<LogLevel>,

    /// Worst level, within ERROR > WARN > INFO > DEBUG.
    pub log_level: LogLevel,

    pub status: ThreadStatus,
    pub time_range: TimeRange,
}

/// Return value of one grouping run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingResult {
    /// Groups in order of first appearance.
    pub thread_groups: Vec<ThreadGroup>,
    pub ungrouped_entries: Vec<LogEntry>,
    pub total_threads: usize,
    pub total_grouped_entries: usize,
    pub total_ungrouped_entries: usize,

    /// Patterns that were skipped because they could not be used.
    pub diagnostics: Vec<PatternDiagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_tokens_case_insensitive() {
        assert_eq!(LogLevel::from_token("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_token("Warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_token("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_token("notice"), None);
    }

    #[test]
    fn test_level_serialises_uppercase() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, "\"WARN\"");
    }

    #[test]
    fn test_status_label_matches_serialised_form() {
        for status in [ThreadStatus::Active, ThreadStatus::Error] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(ThreadStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_pattern_rule_accepts_string_or_object() {
        let from_str: PatternRule = serde_json::from_str(r#""task-\\d+""#).unwrap();
        assert_eq!(from_str, PatternRule::new(r"task-\d+"));

        let from_obj: PatternRule =
            serde_json::from_str(r#"{"source": "thread-\\d+", "flags": "g"}"#).unwrap();
        assert_eq!(from_obj.source, r"thread-\d+");
        assert_eq!(from_obj.flags, "g");

        let no_flags: PatternRule = serde_json::from_str(r#"{"source": "x"}"#).unwrap();
        assert_eq!(no_flags.flags, "gi");
    }

    #[test]
    fn test_thread_pattern_defaults() {
        let p: ThreadPattern = serde_json::from_str(
            r#"{"id": "p", "name": "P", "pattern": "job-\\d+"}"#,
        )
        .unwrap();
        assert!(p.enabled);
        assert!(!p.is_custom);
        assert_eq!(p.priority, constants::DEFAULT_CUSTOM_PRIORITY);
        assert_eq!(p.description, "");
    }

    #[test]
    fn test_search_text_joins_fields() {
        let entry = LogEntry {
            id: 1,
            timestamp: "2024-01-15 08:30:15".to_string(),
            level: LogLevel::Info,
            source: "Main.java".to_string(),
            message: "hello".to_string(),
            raw_line: "2024-01-15 08:30:15 hello".to_string(),
            offset: 0,
        };
        assert_eq!(
            entry.search_text(),
            "hello Main.java 2024-01-15 08:30:15 hello"
        );
    }
}
