// LogThreads - core/extract.rs
//
// Thread identifier extraction.
//
// Patterns are evaluated in the registry's active order. Each distinct
// matched substring becomes one identifier, attributed to the first pattern
// that produced it. A high-priority pattern that matches anything ends the
// evaluation so looser patterns cannot claim the entry.

use crate::core::model::IdentifierMatch;
use crate::core::pattern::PatternRegistry;
use crate::util::constants;
use std::sync::Arc;

/// Controls when extraction stops early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionPolicy {
    /// A pattern whose priority is at or below this value stops evaluation
    /// once it matches. `None` evaluates every pattern.
    pub early_exit_max_priority: Option<i32>,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            early_exit_max_priority: Some(constants::DEFAULT_EARLY_EXIT_MAX_PRIORITY),
        }
    }
}

impl ExtractionPolicy {
    /// Policy from a configured threshold; a negative value disables early
    /// exit.
    pub fn from_threshold(threshold: i32) -> Self {
        Self {
            early_exit_max_priority: (threshold >= 0).then_some(threshold),
        }
    }

    /// Evaluate every pattern regardless of priority.
    pub fn exhaustive() -> Self {
        Self {
            early_exit_max_priority: None,
        }
    }

    fn stops_after(&self, priority: i32) -> bool {
        self.early_exit_max_priority
            .is_some_and(|threshold| priority <= threshold)
    }
}

/// Extract identifiers with the default early-exit policy.
pub fn extract_identifiers(text: &str, registry: &PatternRegistry) -> Vec<IdentifierMatch> {
    extract_identifiers_with(text, registry, &ExtractionPolicy::default())
}

/// Extract identifiers from `text`.
///
/// Results are ordered by pattern evaluation order, then by match order
/// within a pattern. `position` is the byte index of the identifier's first
/// occurrence anywhere in `text`. Empty matches are ignored.
pub fn extract_identifiers_with(
    text: &str,
    registry: &PatternRegistry,
    policy: &ExtractionPolicy,
) -> Vec<IdentifierMatch> {
    let mut matches: Vec<IdentifierMatch> = Vec::new();

    for (pattern, regex) in registry.active() {
        let mut matched = false;

        for m in regex.find_iter(text) {
            let found = m.as_str();
            if found.is_empty() {
                continue;
            }
            matched = true;

            if matches.iter().any(|existing| existing.identifier == found) {
                continue;
            }
            matches.push(IdentifierMatch {
                identifier: found.to_string(),
                pattern: Arc::clone(pattern),
                position: text.find(found).unwrap_or(m.start()),
            });
        }

        if matched && policy.stops_after(pattern.priority) {
            break;
        }
    }

    matches
}
