// LogThreads - core/pattern.rs
//
// Thread pattern validation, compilation and the pattern registry.
//
// Every rule is compiled exactly once, when it enters the registry. A rule
// that fails to compile stays in the registry (so it can be edited or
// exported) but never takes part in extraction; the failure is kept as a
// diagnostic instead of being raised.

use crate::core::model::{GroupingResult, PatternDiagnostic, PatternRule, ThreadPattern};
use crate::util::constants;
use crate::util::error::PatternError;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// =============================================================================
// Validation
// =============================================================================

/// Outcome of validating a candidate pattern string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validate a pattern string as it would be compiled with the default
/// (global, case-insensitive) flags.
pub fn validate_pattern(pattern: &str) -> PatternValidation {
    match compile_rule(&PatternRule::new(pattern)) {
        Ok(_) => PatternValidation {
            valid: true,
            error: None,
        },
        Err(e) => PatternValidation {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

/// Return every non-empty match of `pattern` in `sample`, in order.
///
/// Compile errors are swallowed and yield an empty list.
pub fn test_pattern(pattern: &str, sample: &str) -> Vec<String> {
    match compile_rule(&PatternRule::new(pattern)) {
        Ok(re) => re
            .find_iter(sample)
            .filter(|m| !m.as_str().is_empty())
            .map(|m| m.as_str().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Compile a rule with length validation and flag translation.
///
/// `g` is accepted and ignored (matching is always global). `i`, `m`, `s`
/// and `x` map onto the regex builder options; any other flag is rejected.
pub fn compile_rule(rule: &PatternRule) -> Result<Regex, PatternError> {
    if rule.is_empty() {
        return Err(PatternError::Empty);
    }
    if rule.source.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(PatternError::TooLong {
            length: rule.source.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }

    let mut builder = RegexBuilder::new(&rule.source);
    for flag in rule.flags.chars() {
        match flag {
            'g' => {}
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            other => return Err(PatternError::InvalidFlag { flag: other }),
        }
    }

    builder.build().map_err(|source| PatternError::InvalidRegex {
        pattern: rule.source.clone(),
        source,
    })
}

// =============================================================================
// Built-in patterns
// =============================================================================

/// The built-in pattern set, in registration order.
pub fn default_patterns() -> Vec<ThreadPattern> {
    let builtin = |id: &str, name: &str, source: &str, description: &str, enabled, priority| {
        ThreadPattern {
            id: id.to_string(),
            name: name.to_string(),
            pattern: PatternRule::new(source),
            description: description.to_string(),
            enabled,
            priority,
            is_custom: false,
        }
    };

    vec![
        builtin(
            "task-pattern",
            "Task Pattern",
            r"task-\d+",
            "Matches task-### format (e.g., task-141)",
            true,
            1,
        ),
        builtin(
            "thread-pattern",
            "Thread Pattern",
            r"thread-\d+",
            "Matches thread-### format (e.g., thread-001)",
            true,
            2,
        ),
        builtin(
            "worker-pattern",
            "Worker Pattern",
            r"\w+Worker-\d+",
            "Matches worker patterns (e.g., FileProcessingWorker-3)",
            true,
            3,
        ),
        builtin(
            "session-pattern",
            "Session Pattern",
            r"sess_[a-zA-Z0-9]+",
            "Matches session IDs (e.g., sess_abc123xyz789)",
            false,
            4,
        ),
        builtin(
            "custom-pattern",
            "Custom Pattern",
            "",
            "User-defined custom pattern",
            false,
            5,
        ),
    ]
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
struct RegisteredPattern {
    pattern: Arc<ThreadPattern>,
    /// `None` when the rule is empty or failed to compile.
    regex: Option<Regex>,
    /// Compile failure message, kept for diagnostics.
    error: Option<String>,
}

impl RegisteredPattern {
    fn compile(pattern: ThreadPattern) -> Self {
        let (regex, error) = if pattern.pattern.is_empty() {
            (None, None)
        } else {
            match compile_rule(&pattern.pattern) {
                Ok(re) => (Some(re), None),
                Err(e) => (None, Some(e.to_string())),
            }
        };
        Self {
            pattern: Arc::new(pattern),
            regex,
            error,
        }
    }
}

/// An ordered, editable collection of thread patterns.
///
/// Cloning is cheap (patterns and compiled regexes are shared), so callers
/// hand each grouping run its own snapshot.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    entries: Vec<RegisteredPattern>,
    /// Indices into `entries` of usable patterns, sorted by priority.
    order: Vec<usize>,
    diagnostics: Vec<PatternDiagnostic>,
}

impl PatternRegistry {
    /// Build a registry from an ordered list without failing.
    ///
    /// Invalid rules and duplicate ids become diagnostics. The first pattern
    /// with a given id wins.
    pub fn new(patterns: Vec<ThreadPattern>) -> Self {
        let mut registry = Self::default();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for pattern in patterns {
            if !seen.insert(pattern.id.clone()) {
                rejected.push(PatternDiagnostic {
                    pattern_id: pattern.id.clone(),
                    message: format!("Duplicate pattern id '{}' ignored", pattern.id),
                });
                continue;
            }
            registry.entries.push(RegisteredPattern::compile(pattern));
        }

        registry.rebuild();
        for diag in &rejected {
            tracing::warn!(pattern_id = %diag.pattern_id, "{}", diag.message);
        }
        registry.diagnostics.extend(rejected);
        registry
    }

    /// Registry seeded with the built-in patterns.
    pub fn with_defaults() -> Self {
        Self::new(default_patterns())
    }

    /// Add a new pattern at the end of the registration order.
    ///
    /// The rule must compile, unless it is empty and the pattern disabled
    /// (a placeholder the user has yet to fill in).
    pub fn add(&mut self, pattern: ThreadPattern) -> Result<(), PatternError> {
        if self.entries.iter().any(|e| e.pattern.id == pattern.id) {
            return Err(PatternError::DuplicateId { id: pattern.id });
        }
        if self.entries.len() >= constants::MAX_PATTERNS {
            return Err(PatternError::TooMany {
                count: self.entries.len() + 1,
                max: constants::MAX_PATTERNS,
            });
        }
        check_editable(&pattern)?;

        tracing::debug!(pattern_id = %pattern.id, priority = pattern.priority, "Pattern added");
        self.entries.push(RegisteredPattern::compile(pattern));
        self.rebuild();
        Ok(())
    }

    /// Replace the pattern with the same id, keeping its registration slot.
    pub fn update(&mut self, pattern: ThreadPattern) -> Result<(), PatternError> {
        let index = self.index_of(&pattern.id)?;
        check_editable(&pattern)?;

        tracing::debug!(pattern_id = %pattern.id, "Pattern updated");
        self.entries[index] = RegisteredPattern::compile(pattern);
        self.rebuild();
        Ok(())
    }

    /// Remove a pattern, returning it.
    pub fn remove(&mut self, id: &str) -> Result<ThreadPattern, PatternError> {
        let index = self.index_of(id)?;
        let removed = self.entries.remove(index);
        self.rebuild();
        tracing::debug!(pattern_id = id, "Pattern removed");
        Ok(Arc::try_unwrap(removed.pattern).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Enable or disable a pattern without recompiling it.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), PatternError> {
        let index = self.index_of(id)?;
        let entry = &mut self.entries[index];
        if entry.pattern.enabled != enabled {
            Arc::make_mut(&mut entry.pattern).enabled = enabled;
            self.rebuild();
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ThreadPattern> {
        self.entries
            .iter()
            .find(|e| e.pattern.id == id)
            .map(|e| e.pattern.as_ref())
    }

    /// All patterns in registration order, including unusable ones.
    pub fn patterns(&self) -> impl Iterator<Item = &ThreadPattern> {
        self.entries.iter().map(|e| e.pattern.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Problems with enabled patterns that keep them out of extraction.
    pub fn diagnostics(&self) -> &[PatternDiagnostic] {
        &self.diagnostics
    }

    /// Usable patterns in evaluation order: enabled, non-empty and compiled,
    /// sorted by ascending priority with ties in registration order.
    pub fn active(&self) -> impl Iterator<Item = (&Arc<ThreadPattern>, &Regex)> {
        self.order.iter().filter_map(move |&i| {
            let entry = &self.entries[i];
            entry.regex.as_ref().map(|re| (&entry.pattern, re))
        })
    }

    fn index_of(&self, id: &str) -> Result<usize, PatternError> {
        self.entries
            .iter()
            .position(|e| e.pattern.id == id)
            .ok_or_else(|| PatternError::NotFound { id: id.to_string() })
    }

    /// Recompute evaluation order and diagnostics after any edit.
    fn rebuild(&mut self) {
        self.diagnostics.clear();
        let mut order = Vec::new();

        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.pattern.enabled {
                continue;
            }
            if let Some(message) = &entry.error {
                tracing::warn!(
                    pattern_id = %entry.pattern.id,
                    pattern = %entry.pattern.pattern.source,
                    error = %message,
                    "Invalid pattern skipped"
                );
                self.diagnostics.push(PatternDiagnostic {
                    pattern_id: entry.pattern.id.clone(),
                    message: message.clone(),
                });
            } else if entry.regex.is_some() {
                order.push(i);
            }
        }

        // Stable: equal priorities keep registration order.
        order.sort_by_key(|&i| self.entries[i].pattern.priority);
        self.order = order;
    }
}

fn check_editable(pattern: &ThreadPattern) -> Result<(), PatternError> {
    if pattern.pattern.is_empty() && !pattern.enabled {
        return Ok(());
    }
    compile_rule(&pattern.pattern).map(|_| ())
}

// =============================================================================
// Conflict detection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Two patterns match the same sample text.
    Overlap,
    /// A pattern produced no group in the supplied grouping result.
    Unused,
    /// Two enabled patterns share a display name.
    DuplicateName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternConflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub pattern_ids: Vec<String>,
    pub description: String,
}

/// Report overlapping, unused and ambiguously named patterns.
///
/// Overlaps are tested against `samples`, or the built-in sample texts when
/// `samples` is empty. Unused patterns are only reported when a grouping
/// result is supplied.
pub fn detect_conflicts(
    registry: &PatternRegistry,
    samples: &[&str],
    grouping: Option<&GroupingResult>,
) -> Vec<PatternConflict> {
    let samples = if samples.is_empty() {
        constants::CONFLICT_SAMPLE_TEXTS
    } else {
        samples
    };
    let active: Vec<_> = registry.active().collect();
    let mut conflicts = Vec::new();

    for (i, (a, re_a)) in active.iter().enumerate() {
        for (b, re_b) in &active[i + 1..] {
            if let Some(sample) = samples
                .iter()
                .find(|s| re_a.is_match(s) && re_b.is_match(s))
            {
                conflicts.push(PatternConflict {
                    kind: ConflictKind::Overlap,
                    severity: ConflictSeverity::Medium,
                    pattern_ids: vec![a.id.clone(), b.id.clone()],
                    description: format!(
                        "'{}' and '{}' both match \"{sample}\"",
                        a.name, b.name
                    ),
                });
            }
        }
    }

    if let Some(result) = grouping {
        let used: HashSet<&str> = result
            .thread_groups
            .iter()
            .map(|g| g.identifier.pattern.id.as_str())
            .collect();
        for (pattern, _) in &active {
            if !used.contains(pattern.id.as_str()) {
                conflicts.push(PatternConflict {
                    kind: ConflictKind::Unused,
                    severity: ConflictSeverity::Low,
                    pattern_ids: vec![pattern.id.clone()],
                    description: format!("'{}' did not identify any thread", pattern.name),
                });
            }
        }
    }

    let mut by_name: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for pattern in registry.patterns().filter(|p| p.enabled) {
        by_name
            .entry(pattern.name.trim())
            .or_default()
            .push(pattern.id.clone());
    }
    for (name, ids) in by_name {
        if ids.len() > 1 {
            conflicts.push(PatternConflict {
                kind: ConflictKind::DuplicateName,
                severity: ConflictSeverity::High,
                description: format!("{} enabled patterns are named '{name}'", ids.len()),
                pattern_ids: ids,
            });
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(id: &str, source: &str, priority: i32) -> ThreadPattern {
        ThreadPattern {
            id: id.to_string(),
            name: id.to_string(),
            pattern: PatternRule::new(source),
            description: String::new(),
            enabled: true,
            priority,
            is_custom: true,
        }
    }

    #[test]
    fn test_validate_pattern() {
        assert_eq!(
            validate_pattern(r"task-\d+"),
            PatternValidation {
                valid: true,
                error: None
            }
        );

        let bad = validate_pattern("[unclosed");
        assert!(!bad.valid);
        assert!(bad.error.unwrap().starts_with("Invalid regular expression"));

        let empty = validate_pattern("   ");
        assert!(!empty.valid);
        assert_eq!(empty.error.as_deref(), Some("Pattern cannot be empty"));
    }

    #[test]
    fn test_test_pattern_returns_all_matches() {
        assert_eq!(test_pattern(r"task-\d+", "task-9 task-99"), vec!["task-9", "task-99"]);
        assert_eq!(test_pattern(r"TASK-\d+", "task-7"), vec!["task-7"]);
        assert!(test_pattern("[unclosed", "anything").is_empty());
    }

    #[test]
    fn test_compile_rule_flags() {
        let re = compile_rule(&PatternRule::with_flags("abc", "g")).unwrap();
        assert!(!re.is_match("ABC"));

        let re = compile_rule(&PatternRule::with_flags("a b c", "gix")).unwrap();
        assert!(re.is_match("ABC"));

        assert!(matches!(
            compile_rule(&PatternRule::with_flags("abc", "gy")),
            Err(PatternError::InvalidFlag { flag: 'y' })
        ));
    }

    #[test]
    fn test_compile_rule_too_long() {
        let long = "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH + 1);
        assert!(matches!(
            compile_rule(&PatternRule::new(long)),
            Err(PatternError::TooLong { .. })
        ));
    }

    #[test]
    fn test_defaults_active_order() {
        let registry = PatternRegistry::with_defaults();
        assert_eq!(registry.len(), 5);
        let ids: Vec<&str> = registry.active().map(|(p, _)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["task-pattern", "thread-pattern", "worker-pattern"]);
        assert!(registry.diagnostics().is_empty());
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let registry = PatternRegistry::new(vec![
            custom("b", "bbb", 5),
            custom("a", "aaa", 5),
            custom("first", "zzz", 1),
        ]);
        let ids: Vec<&str> = registry.active().map(|(p, _)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "b", "a"]);
    }

    #[test]
    fn test_invalid_pattern_becomes_diagnostic() {
        let registry = PatternRegistry::new(vec![
            custom("broken", "[unclosed", 1),
            custom("ok", r"job-\d+", 2),
        ]);
        let ids: Vec<&str> = registry.active().map(|(p, _)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
        assert_eq!(registry.diagnostics().len(), 1);
        assert_eq!(registry.diagnostics()[0].pattern_id, "broken");
        // Still present for editing.
        assert!(registry.get("broken").is_some());
    }

    #[test]
    fn test_duplicate_ids_in_constructor() {
        let registry = PatternRegistry::new(vec![custom("x", "one", 1), custom("x", "two", 2)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().pattern.source, "one");
        assert_eq!(registry.diagnostics().len(), 1);
    }

    #[test]
    fn test_add_update_remove() {
        let mut registry = PatternRegistry::with_defaults();

        registry.add(custom("job", r"job-\d+", 0)).unwrap();
        assert_eq!(registry.active().next().unwrap().0.id, "job");

        assert!(matches!(
            registry.add(custom("job", "x", 1)),
            Err(PatternError::DuplicateId { .. })
        ));
        assert!(matches!(
            registry.add(custom("bad", "(", 1)),
            Err(PatternError::InvalidRegex { .. })
        ));
        assert!(matches!(
            registry.add(custom("empty", "", 1)),
            Err(PatternError::Empty)
        ));

        registry.update(custom("job", r"job_\d+", 20)).unwrap();
        assert_eq!(registry.get("job").unwrap().priority, 20);
        assert!(matches!(
            registry.update(custom("nope", "x", 1)),
            Err(PatternError::NotFound { .. })
        ));

        let removed = registry.remove("job").unwrap();
        assert_eq!(removed.pattern.source, r"job_\d+");
        assert!(registry.get("job").is_none());
    }

    #[test]
    fn test_add_respects_capacity() {
        let mut registry = PatternRegistry::new(
            (0..constants::MAX_PATTERNS)
                .map(|i| custom(&format!("p{i}"), "x", 1))
                .collect(),
        );
        assert!(matches!(
            registry.add(custom("one-more", "y", 1)),
            Err(PatternError::TooMany { .. })
        ));
    }

    #[test]
    fn test_set_enabled() {
        let mut registry = PatternRegistry::with_defaults();
        registry.set_enabled("session-pattern", true).unwrap();
        registry.set_enabled("task-pattern", false).unwrap();
        let ids: Vec<&str> = registry.active().map(|(p, _)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["thread-pattern", "worker-pattern", "session-pattern"]);

        // Enabling the empty placeholder does not make it active.
        registry.set_enabled("custom-pattern", true).unwrap();
        assert_eq!(registry.active().count(), 3);
        assert!(registry.diagnostics().is_empty());
    }

    #[test]
    fn test_detect_overlap_and_duplicate_name() {
        let mut registry = PatternRegistry::with_defaults();
        registry.add(custom("digits", r"\d+", 6)).unwrap();
        let mut dup = custom("task-again", "task", 7);
        dup.name = "Task Pattern".to_string();
        registry.add(dup).unwrap();

        let conflicts = detect_conflicts(&registry, &[], None);
        assert!(conflicts.iter().any(|c| c.kind == ConflictKind::Overlap
            && c.pattern_ids == vec!["task-pattern".to_string(), "digits".to_string()]));
        let dup = conflicts
            .iter()
            .find(|c| c.kind == ConflictKind::DuplicateName)
            .unwrap();
        assert_eq!(dup.severity, ConflictSeverity::High);
        assert_eq!(dup.pattern_ids, vec!["task-pattern", "task-again"]);
        assert!(!conflicts.iter().any(|c| c.kind == ConflictKind::Unused));
    }

    #[test]
    fn test_defaults_have_no_overlaps() {
        let registry = PatternRegistry::with_defaults();
        assert!(detect_conflicts(&registry, &[], None).is_empty());
    }
}
