// LogThreads - core/parser.rs
//
// Line-oriented log parsing.
// Core layer: accepts text, never touches the filesystem directly.
//
// A line is an entry only if it starts with a `YYYY-MM-DD HH:MM:SS[.fff]`
// timestamp. Anything else is dropped without error; callers that care
// count the skips.

use crate::core::model::{LogEntry, LogLevel};
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;

/// Source tag used when a line carries no `[bracketed.token]`.
pub const UNKNOWN_SOURCE: &str = "Unknown";

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}[.\d]*)")
            .expect("timestamp regex is valid")
    })
}

fn level_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(DEBUG|INFO|WARN|WARNING|ERROR|FATAL|TRACE)\b")
            .expect("level regex is valid")
    })
}

fn source_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([\w.\-]+)\]").expect("source regex is valid"))
}

/// Parse one raw line into a `LogEntry`.
///
/// Returns `None` when the line has no leading timestamp. Never fails
/// otherwise: a missing level defaults to `INFO` and a missing source tag to
/// `"Unknown"`. Pure function of its inputs.
pub fn parse_line(line: &str, offset: u64, id: u64) -> Option<LogEntry> {
    let ts = timestamp_re().captures(line)?.get(1)?;

    let level = level_re()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| LogLevel::from_token(m.as_str()))
        .unwrap_or_default();

    let source = source_re()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

    Some(LogEntry {
        id,
        timestamp: ts.as_str().to_string(),
        level,
        source,
        message: line[ts.end()..].trim().to_string(),
        raw_line: line.to_string(),
        offset,
    })
}

/// Parse a timestamp string as a date for range comparisons.
///
/// Accepts the parser's timestamp shape with or without fractional seconds.
/// Returns `None` for anything chrono rejects (e.g. `12:00:00.1.2`).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    // The separator may be any whitespace char; chrono wants a space.
    let normalised: String = raw
        .char_indices()
        .map(|(i, c)| if i == 10 && c.is_whitespace() { ' ' } else { c })
        .collect();
    NaiveDateTime::parse_from_str(&normalised, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalised, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Strip a trailing `\r` and reject blank lines.
///
/// Shared by the one-shot parser and the chunked reader so both split input
/// into exactly the same lines.
pub(crate) fn normalise_line(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Result of parsing a whole text in one shot.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Parsed entries in input order.
    pub entries: Vec<LogEntry>,
    /// Non-blank lines examined.
    pub lines_processed: u64,
    /// Non-blank lines dropped for lacking a timestamp.
    pub lines_skipped: u64,
}

/// Parse an entire text. Offsets are byte offsets into `content`; ids are
/// allocated sequentially from `id_start`.
pub fn parse_content(content: &str, id_start: u64) -> ParseResult {
    let mut result = ParseResult::default();
    let mut next_id = id_start;
    let mut offset: u64 = 0;

    for raw in content.split('\n') {
        let line_offset = offset;
        offset += raw.len() as u64 + 1;

        let Some(line) = normalise_line(raw) else {
            continue;
        };
        result.lines_processed += 1;

        match parse_line(line, line_offset, next_id) {
            Some(entry) => {
                result.entries.push(entry);
                next_id += 1;
            }
            None => {
                result.lines_skipped += 1;
                tracing::trace!(
                    offset = line_offset,
                    line = crate::util::logging::preview(line),
                    "Line has no timestamp, skipped"
                );
            }
        }
    }

    tracing::debug!(
        entries = result.entries.len(),
        skipped = result.lines_skipped,
        "Parsed content"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str =
        "2024-01-15 08:30:15.123 INFO [TaskManager.java] Starting task-141 processing";

    #[test]
    fn test_parse_full_line() {
        let entry = parse_line(LINE, 42, 7).unwrap();
        assert_eq!(entry.id, 7);
        assert_eq!(entry.offset, 42);
        assert_eq!(entry.timestamp, "2024-01-15 08:30:15.123");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.source, "TaskManager.java");
        assert_eq!(
            entry.message,
            "INFO [TaskManager.java] Starting task-141 processing"
        );
        assert_eq!(entry.raw_line, LINE);
        assert_eq!(entry.full_message(), LINE);
    }

    #[test]
    fn test_parse_is_deterministic() {
        assert_eq!(parse_line(LINE, 0, 1), parse_line(LINE, 0, 1));
    }

    #[test]
    fn test_line_without_timestamp_is_dropped() {
        assert!(parse_line("not a log line at all", 0, 0).is_none());
        assert!(parse_line("  2024-01-15 08:30:15 indented", 0, 0).is_none());
        assert!(parse_line("15/01/2024 08:30:15 other format", 0, 0).is_none());
        assert!(parse_line("", 0, 0).is_none());
    }

    #[test]
    fn test_level_defaults_to_info() {
        let entry = parse_line("2024-01-15 08:30:15 something happened", 0, 0).unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.source, UNKNOWN_SOURCE);
    }

    #[test]
    fn test_level_is_case_insensitive_whole_word() {
        let entry = parse_line("2024-01-15 08:30:15 [x] error: disk full", 0, 0).unwrap();
        assert_eq!(entry.level, LogLevel::Error);

        // "INFORMATION" is not a whole-word match for INFO; WARNING is.
        let entry =
            parse_line("2024-01-15 08:30:15 INFORMATION only, then Warning", 0, 0).unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[test]
    fn test_first_level_token_wins() {
        let entry = parse_line("2024-01-15 08:30:15 DEBUG retrying after ERROR", 0, 0).unwrap();
        assert_eq!(entry.level, LogLevel::Debug);
    }

    #[test]
    fn test_source_allows_dots_and_dashes() {
        let entry =
            parse_line("2024-01-15 08:30:15 WARN [com.acme.db-pool] slow query", 0, 0).unwrap();
        assert_eq!(entry.source, "com.acme.db-pool");
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-01-15 08:30:15").is_some());
        assert!(parse_timestamp("2024-01-15 08:30:15.123").is_some());
        assert!(parse_timestamp("2024-01-15\t08:30:15").is_some());
        assert!(parse_timestamp("2024-01-15 08:30:15.1.2").is_none());
        assert!(parse_timestamp("2024-13-45 08:30:15").is_none());
    }

    #[test]
    fn test_parse_content_offsets_and_ids() {
        let content = "2024-01-15 08:30:15 INFO a\r\n\nnoise\n2024-01-15 08:30:16 WARN b";
        let result = parse_content(content, 100);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.lines_processed, 3);
        assert_eq!(result.lines_skipped, 1);

        assert_eq!(result.entries[0].id, 100);
        assert_eq!(result.entries[0].offset, 0);
        assert_eq!(result.entries[0].raw_line, "2024-01-15 08:30:15 INFO a");

        assert_eq!(result.entries[1].id, 101);
        let second_offset = content.find("2024-01-15 08:30:16").unwrap() as u64;
        assert_eq!(result.entries[1].offset, second_offset);
        assert_eq!(result.entries[1].level, LogLevel::Warn);
    }
}
