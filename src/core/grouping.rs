// LogThreads - core/grouping.rs
//
// Folds parsed entries into thread groups keyed by identifier string.
//
// Groups live in a Vec in order of first appearance, with a HashMap from
// identifier to index. The key is the identifier text alone: two patterns
// producing the same literal string feed the same group.

use crate::core::extract::{extract_identifiers_with, ExtractionPolicy};
use crate::core::model::{
    GroupingResult, IdentifierMatch, LogEntry, LogLevel, ThreadGroup, ThreadStatus, TimeRange,
};
use crate::core::pattern::PatternRegistry;
use std::collections::{BTreeSet, HashMap};

/// Incremental grouping state that survives across batches.
///
/// Feed entries as chunks arrive, then call `finish` for the totals.
#[derive(Debug)]
pub struct GroupAccumulator<'a> {
    registry: &'a PatternRegistry,
    policy: ExtractionPolicy,
    groups: Vec<ThreadGroup>,
    index: HashMap<String, usize>,
    ungrouped: Vec<LogEntry>,
}

impl<'a> GroupAccumulator<'a> {
    pub fn new(registry: &'a PatternRegistry) -> Self {
        Self::with_policy(registry, ExtractionPolicy::default())
    }

    pub fn with_policy(registry: &'a PatternRegistry, policy: ExtractionPolicy) -> Self {
        Self {
            registry,
            policy,
            groups: Vec::new(),
            index: HashMap::new(),
            ungrouped: Vec::new(),
        }
    }

    /// Route one entry to its group, or to the ungrouped list.
    pub fn add_entry(&mut self, entry: LogEntry) {
        let text = entry.search_text();
        let mut matches = extract_identifiers_with(&text, self.registry, &self.policy);
        if matches.is_empty() {
            self.ungrouped.push(entry);
            return;
        }

        // First match is the primary identifier.
        let primary = matches.swap_remove(0);
        let slot = match self.index.get(&primary.identifier) {
            Some(&i) => i,
            None => {
                let i = self.groups.len();
                self.index.insert(primary.identifier.clone(), i);
                self.groups.push(new_group(primary));
                i
            }
        };
        add_to_group(&mut self.groups[slot], entry);
    }

    pub fn add_entries<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = LogEntry>,
    {
        for entry in entries {
            self.add_entry(entry);
        }
    }

    /// Groups built so far, in order of first appearance.
    pub fn groups(&self) -> &[ThreadGroup] {
        &self.groups
    }

    pub fn ungrouped(&self) -> &[LogEntry] {
        &self.ungrouped
    }

    pub fn finish(self) -> GroupingResult {
        let total_grouped_entries = self.groups.iter().map(|g| g.entry_count).sum();

        tracing::debug!(
            threads = self.groups.len(),
            grouped = total_grouped_entries,
            ungrouped = self.ungrouped.len(),
            "Grouping finished"
        );

        GroupingResult {
            total_threads: self.groups.len(),
            total_grouped_entries,
            total_ungrouped_entries: self.ungrouped.len(),
            thread_groups: self.groups,
            ungrouped_entries: self.ungrouped,
            diagnostics: self.registry.diagnostics().to_vec(),
        }
    }
}

/// Group one batch of entries from scratch.
pub fn group_by_pattern(entries: &[LogEntry], registry: &PatternRegistry) -> GroupingResult {
    group_by_pattern_with(entries, registry, ExtractionPolicy::default())
}

pub fn group_by_pattern_with(
    entries: &[LogEntry],
    registry: &PatternRegistry,
    policy: ExtractionPolicy,
) -> GroupingResult {
    let mut acc = GroupAccumulator::with_policy(registry, policy);
    acc.add_entries(entries.iter().cloned());
    acc.finish()
}

fn new_group(identifier: IdentifierMatch) -> ThreadGroup {
    ThreadGroup {
        thread_id: identifier.identifier.clone(),
        thread_name: identifier.identifier.clone(),
        identifier,
        entries: Vec::new(),
        entry_count: 0,
        log_levels: BTreeSet::new(),
        log_level: LogLevel::Info,
        status: ThreadStatus::Active,
        time_range: TimeRange::default(),
    }
}

fn add_to_group(group: &mut ThreadGroup, entry: LogEntry) {
    group.log_levels.insert(entry.level);
    if let Some(at) = entry.parsed_timestamp() {
        expand_range(&mut group.time_range, at, &entry.timestamp);
    }
    group.entries.push(entry);
    group.entry_count = group.entries.len();

    let (level, status) = derive_severity(&group.log_levels);
    group.log_level = level;
    group.status = status;
}

/// Worst level class present: ERROR (incl. FATAL) > WARN > INFO > DEBUG
/// (incl. TRACE). An ERROR-class level also marks the group as failed.
pub fn derive_severity(levels: &BTreeSet<LogLevel>) -> (LogLevel, ThreadStatus) {
    if levels.contains(&LogLevel::Error) || levels.contains(&LogLevel::Fatal) {
        (LogLevel::Error, ThreadStatus::Error)
    } else if levels.contains(&LogLevel::Warn) {
        (LogLevel::Warn, ThreadStatus::Active)
    } else if levels.contains(&LogLevel::Info) {
        (LogLevel::Info, ThreadStatus::Active)
    } else {
        (LogLevel::Debug, ThreadStatus::Active)
    }
}

fn expand_range(range: &mut TimeRange, at: chrono::NaiveDateTime, raw: &str) {
    if range.start_at.map_or(true, |start| at < start) {
        range.start_at = Some(at);
        range.start = Some(raw.to_string());
    }
    if range.end_at.map_or(true, |end| at > end) {
        range.end_at = Some(at);
        range.end = Some(raw.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{PatternRule, ThreadPattern};
    use crate::core::parser::parse_line;

    fn entry(id: u64, timestamp: &str, level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            id,
            timestamp: timestamp.to_string(),
            level,
            source: "Test.java".to_string(),
            message: message.to_string(),
            raw_line: format!("{timestamp} {level} [Test.java] {message}"),
            offset: id * 100,
        }
    }

    #[test]
    fn test_scenario_two_task_groups() {
        let lines = [
            "2024-01-15 08:30:15.123 INFO [TaskManager.java] Starting task-141 processing",
            "2024-01-15 08:30:16.456 DEBUG [DatabaseConnector.java] task-141: connected",
            "2024-01-15 08:32:10.234 INFO [AuthService.java] task-142 started auth",
            "not a log line at all",
        ];
        let entries: Vec<LogEntry> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| parse_line(l, i as u64, i as u64))
            .collect();
        assert_eq!(entries.len(), 3);

        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());
        assert_eq!(result.total_threads, 2);
        assert_eq!(result.thread_groups[0].thread_id, "task-141");
        assert_eq!(result.thread_groups[0].entry_count, 2);
        assert_eq!(result.thread_groups[0].log_level, LogLevel::Info);
        assert_eq!(result.thread_groups[1].thread_id, "task-142");
        assert_eq!(result.thread_groups[1].entry_count, 1);
        assert!(result.ungrouped_entries.is_empty());
        assert_eq!(result.total_grouped_entries, 3);
        assert_eq!(
            result.thread_groups[0].time_range.start.as_deref(),
            Some("2024-01-15 08:30:15.123")
        );
        assert_eq!(
            result.thread_groups[0].time_range.end.as_deref(),
            Some("2024-01-15 08:30:16.456")
        );
    }

    #[test]
    fn test_partition_invariant() {
        let entries = vec![
            entry(1, "2024-01-15 08:00:00", LogLevel::Info, "task-1 start"),
            entry(2, "2024-01-15 08:00:01", LogLevel::Info, "no identifier"),
            entry(3, "2024-01-15 08:00:02", LogLevel::Warn, "thread-9 slow"),
            entry(4, "2024-01-15 08:00:03", LogLevel::Info, "task-1 done"),
            entry(5, "2024-01-15 08:00:04", LogLevel::Debug, "still nothing"),
        ];
        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());

        let grouped: usize = result.thread_groups.iter().map(|g| g.entry_count).sum();
        assert_eq!(entries.len(), grouped + result.ungrouped_entries.len());

        let mut seen: Vec<u64> = result
            .thread_groups
            .iter()
            .flat_map(|g| g.entries.iter().map(|e| e.id))
            .chain(result.ungrouped_entries.iter().map(|e| e.id))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.total_ungrouped_entries, 2);
    }

    #[test]
    fn test_error_wins_regardless_of_order() {
        let levels = [LogLevel::Info, LogLevel::Debug, LogLevel::Warn, LogLevel::Error];
        let mut entries: Vec<LogEntry> = levels
            .iter()
            .enumerate()
            .map(|(i, &l)| entry(i as u64, "2024-01-15 08:00:00", l, "task-7 step"))
            .collect();

        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());
        assert_eq!(result.thread_groups[0].log_level, LogLevel::Error);
        assert_eq!(result.thread_groups[0].status, ThreadStatus::Error);

        entries.reverse();
        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());
        assert_eq!(result.thread_groups[0].log_level, LogLevel::Error);
        assert_eq!(result.thread_groups[0].status, ThreadStatus::Error);

        entries.retain(|e| e.level != LogLevel::Error);
        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());
        assert_eq!(result.thread_groups[0].log_level, LogLevel::Warn);
        assert_eq!(result.thread_groups[0].status, ThreadStatus::Active);
    }

    #[test]
    fn test_fatal_and_trace_classes() {
        let fatal: BTreeSet<_> = [LogLevel::Info, LogLevel::Fatal].into_iter().collect();
        assert_eq!(derive_severity(&fatal), (LogLevel::Error, ThreadStatus::Error));

        let trace: BTreeSet<_> = [LogLevel::Trace].into_iter().collect();
        assert_eq!(derive_severity(&trace), (LogLevel::Debug, ThreadStatus::Active));
    }

    #[test]
    fn test_unparsable_timestamp_does_not_touch_range() {
        let entries = vec![
            entry(1, "2024-01-15 08:00:05", LogLevel::Info, "task-3 a"),
            entry(2, "2024-01-15 08:00:99", LogLevel::Info, "task-3 b"),
            entry(3, "2024-01-15 08:00:01", LogLevel::Info, "task-3 c"),
        ];
        let result = group_by_pattern(&entries, &PatternRegistry::with_defaults());
        let range = &result.thread_groups[0].time_range;
        assert_eq!(range.start.as_deref(), Some("2024-01-15 08:00:01"));
        assert_eq!(range.end.as_deref(), Some("2024-01-15 08:00:05"));
        assert!(range.start_at().unwrap() < range.end_at().unwrap());
    }

    #[test]
    fn test_same_literal_from_different_patterns_shares_group() {
        let mut registry = PatternRegistry::with_defaults();
        registry
            .add(ThreadPattern {
                id: "literal".to_string(),
                name: "Literal".to_string(),
                pattern: PatternRule::new(r"\bref:\S+"),
                description: String::new(),
                enabled: true,
                priority: 0,
                is_custom: true,
            })
            .unwrap();
        registry.set_enabled("task-pattern", false).unwrap();
        registry
            .add(ThreadPattern {
                id: "bare".to_string(),
                name: "Bare".to_string(),
                pattern: PatternRule::new(r"ref:[a-z]+"),
                description: String::new(),
                enabled: true,
                priority: 9,
                is_custom: true,
            })
            .unwrap();

        // "literal" claims the first entry; only "bare" matches the second,
        // yet both produce "ref:abc".
        let entries = vec![
            entry(1, "2024-01-15 08:00:00", LogLevel::Info, "ref:abc"),
            entry(2, "2024-01-15 08:00:01", LogLevel::Info, "xref:abc"),
        ];
        let result = group_by_pattern(&entries, &registry);
        assert_eq!(result.total_threads, 1);
        assert_eq!(result.thread_groups[0].entry_count, 2);
        assert_eq!(result.thread_groups[0].identifier.pattern.id, "literal");
    }

    #[test]
    fn test_accumulator_across_batches_matches_single_run() {
        let registry = PatternRegistry::with_defaults();
        let entries: Vec<LogEntry> = (0..10)
            .map(|i| {
                entry(
                    i,
                    "2024-01-15 08:00:00",
                    LogLevel::Info,
                    &format!("task-{} work", i % 3),
                )
            })
            .collect();

        let mut acc = GroupAccumulator::new(&registry);
        for batch in entries.chunks(4) {
            acc.add_entries(batch.to_vec());
        }
        let incremental = acc.finish();
        let single = group_by_pattern(&entries, &registry);

        assert_eq!(incremental.total_threads, single.total_threads);
        for (a, b) in incremental.thread_groups.iter().zip(&single.thread_groups) {
            assert_eq!(a.thread_id, b.thread_id);
            assert_eq!(a.entries, b.entries);
        }
    }

    #[test]
    fn test_result_carries_diagnostics() {
        let registry = PatternRegistry::new(vec![ThreadPattern {
            id: "broken".to_string(),
            name: "Broken".to_string(),
            pattern: PatternRule::new("(unclosed"),
            description: String::new(),
            enabled: true,
            priority: 1,
            is_custom: true,
        }]);
        let entries = vec![entry(1, "2024-01-15 08:00:00", LogLevel::Info, "task-1")];
        let result = group_by_pattern(&entries, &registry);
        assert_eq!(result.total_ungrouped_entries, 1);
        assert_eq!(result.diagnostics.len(), 1);
    }
}
