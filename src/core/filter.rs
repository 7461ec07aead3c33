// LogThreads - core/filter.rs
//
// Composable filters over thread groups, plus field search over entries.
// All active filters are AND-combined.
// Core layer: pure logic, no I/O.

use crate::core::model::{LogEntry, LogLevel, ThreadGroup, ThreadStatus};
use crate::util::error::PatternError;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashSet;

// =============================================================================
// Thread filter
// =============================================================================

/// Complete thread filter state. All fields are AND-combined when applied.
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    /// Derived group levels to include (empty = all).
    pub levels: HashSet<LogLevel>,

    /// Thread ids to include (empty = all).
    pub thread_ids: HashSet<String>,

    /// Statuses to include (empty = all).
    pub statuses: HashSet<ThreadStatus>,

    /// Substring search over thread name, id and entry messages
    /// (case-insensitive). Empty = no filter.
    pub text_search: String,

    /// Compiled regex search over the same fields. None = no regex filter.
    pub regex_search: Option<Regex>,

    /// Keep groups whose time range ends at or after this point.
    pub time_start: Option<NaiveDateTime>,

    /// Keep groups whose time range starts at or before this point.
    pub time_end: Option<NaiveDateTime>,

    /// Minimum number of entries. 0 = no filter.
    pub min_entries: usize,
}

impl ThreadFilter {
    /// Returns true if no filters are active.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
            && self.thread_ids.is_empty()
            && self.statuses.is_empty()
            && self.text_search.is_empty()
            && self.regex_search.is_none()
            && self.time_start.is_none()
            && self.time_end.is_none()
            && self.min_entries == 0
    }

    /// Set the regex search pattern, compiling it.
    /// An empty pattern clears the regex filter.
    pub fn set_regex(&mut self, pattern: &str) -> Result<(), PatternError> {
        if pattern.is_empty() {
            self.regex_search = None;
            return Ok(());
        }
        let regex = Regex::new(pattern).map_err(|e| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.regex_search = Some(regex);
        Ok(())
    }

    /// Quick filter for groups that saw an error.
    pub fn errors_only() -> Self {
        Self {
            statuses: [ThreadStatus::Error].into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Apply a thread filter, returning indices of matching groups.
pub fn apply_thread_filter(groups: &[ThreadGroup], filter: &ThreadFilter) -> Vec<usize> {
    if filter.is_empty() {
        return (0..groups.len()).collect();
    }

    let text_lower = filter.text_search.to_lowercase();

    groups
        .iter()
        .enumerate()
        .filter(|(_, group)| matches_all(group, filter, &text_lower))
        .map(|(idx, _)| idx)
        .collect()
}

fn matches_all(group: &ThreadGroup, filter: &ThreadFilter, text_lower: &str) -> bool {
    if !filter.levels.is_empty() && !filter.levels.contains(&group.log_level) {
        return false;
    }
    if !filter.thread_ids.is_empty() && !filter.thread_ids.contains(&group.thread_id) {
        return false;
    }
    if !filter.statuses.is_empty() && !filter.statuses.contains(&group.status) {
        return false;
    }
    if group.entry_count < filter.min_entries {
        return false;
    }

    // Groups without a parsed range are excluded from time filters.
    if let Some(start) = filter.time_start {
        match group.time_range.end_at() {
            Some(end) if end >= start => {}
            _ => return false,
        }
    }
    if let Some(end) = filter.time_end {
        match group.time_range.start_at() {
            Some(start) if start <= end => {}
            _ => return false,
        }
    }

    if !text_lower.is_empty()
        && !searchable_fields(group).any(|field| field.to_lowercase().contains(text_lower))
    {
        return false;
    }

    if let Some(ref regex) = filter.regex_search {
        if !searchable_fields(group).any(|field| regex.is_match(field)) {
            return false;
        }
    }

    true
}

fn searchable_fields(group: &ThreadGroup) -> impl Iterator<Item = &str> {
    [group.thread_name.as_str(), group.thread_id.as_str()]
        .into_iter()
        .chain(group.entries.iter().map(|e| e.message.as_str()))
}

// =============================================================================
// Entry search
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Message,
    Source,
    FullMessage,
}

impl SearchField {
    fn value<'e>(&self, entry: &'e LogEntry) -> &'e str {
        match self {
            SearchField::Message => &entry.message,
            SearchField::Source => &entry.source,
            SearchField::FullMessage => entry.full_message(),
        }
    }
}

/// Substring search over selected entry fields.
#[derive(Debug, Clone)]
pub struct EntrySearch {
    pub query: String,
    pub case_sensitive: bool,
    /// Fields searched; a hit in any one is enough.
    pub fields: Vec<SearchField>,
    /// Entry levels to include (empty = all).
    pub levels: HashSet<LogLevel>,
}

impl EntrySearch {
    /// Case-insensitive search over message, source and full line.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            case_sensitive: false,
            fields: vec![
                SearchField::Message,
                SearchField::Source,
                SearchField::FullMessage,
            ],
            levels: HashSet::new(),
        }
    }

    /// Predicate for this search, with the query prepared once.
    pub fn matcher(&self) -> impl Fn(&LogEntry) -> bool + '_ {
        let term = if self.case_sensitive {
            self.query.clone()
        } else {
            self.query.to_lowercase()
        };

        move |entry: &LogEntry| {
            if !self.levels.is_empty() && !self.levels.contains(&entry.level) {
                return false;
            }
            self.fields.iter().any(|field| {
                let value = field.value(entry);
                if self.case_sensitive {
                    value.contains(term.as_str())
                } else {
                    value.to_lowercase().contains(term.as_str())
                }
            })
        }
    }
}

/// Indices of entries matching the search. An empty query matches every
/// entry that passes the level filter.
pub fn search_entries(entries: &[LogEntry], search: &EntrySearch) -> Vec<usize> {
    let matches = search.matcher();
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| matches(entry))
        .map(|(idx, _)| idx)
        .collect()
}
