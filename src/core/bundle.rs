// LogThreads - core/bundle.rs
//
// JSON pattern bundles: the import/export format for pattern lists.
//
// Export always writes `pattern` as a `{source, flags}` object; import also
// accepts a bare string. A bad entry is skipped with a diagnostic, only a
// structurally unusable document is an error.

use crate::core::model::{PatternDiagnostic, ThreadPattern};
use crate::core::pattern::PatternRegistry;
use crate::util::constants;
use crate::util::error::PatternError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Which patterns an export includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExportScope {
    #[default]
    All,
    EnabledOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Size of the registry the bundle was taken from.
    pub total_patterns: usize,
    pub enabled_patterns: usize,
    pub export_type: ExportScope,
}

/// A serialisable pattern list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternBundle {
    pub version: String,
    /// RFC 3339 export time.
    pub timestamp: String,
    pub patterns: Vec<ThreadPattern>,
    pub metadata: BundleMetadata,
}

/// Snapshot a registry as a bundle.
pub fn export_bundle(registry: &PatternRegistry, scope: ExportScope) -> PatternBundle {
    let enabled_patterns = registry.patterns().filter(|p| p.enabled).count();
    let patterns: Vec<ThreadPattern> = registry
        .patterns()
        .filter(|p| scope == ExportScope::All || p.enabled)
        .cloned()
        .collect();

    tracing::debug!(exported = patterns.len(), scope = ?scope, "Pattern bundle exported");

    PatternBundle {
        version: constants::PATTERN_BUNDLE_VERSION.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        patterns,
        metadata: BundleMetadata {
            total_patterns: registry.len(),
            enabled_patterns,
            export_type: scope,
        },
    }
}

/// Serialise a bundle as pretty-printed JSON.
pub fn bundle_to_json(bundle: &PatternBundle) -> Result<String, PatternError> {
    serde_json::to_string_pretty(bundle).map_err(|source| PatternError::Json { source })
}

/// Parse a bundle document, keeping every usable pattern.
///
/// Only the `patterns` array is required; version, timestamp and metadata
/// are informational. Entries that do not deserialise, or that have an
/// empty name or rule, are reported as diagnostics.
pub fn import_bundle(
    json: &str,
) -> Result<(Vec<ThreadPattern>, Vec<PatternDiagnostic>), PatternError> {
    let doc: serde_json::Value =
        serde_json::from_str(json).map_err(|source| PatternError::Json { source })?;

    let raw_patterns = doc
        .get("patterns")
        .and_then(|p| p.as_array())
        .ok_or_else(|| PatternError::InvalidBundle {
            reason: "missing patterns array".to_string(),
        })?;

    let mut patterns = Vec::with_capacity(raw_patterns.len());
    let mut diagnostics = Vec::new();

    for (index, raw) in raw_patterns.iter().enumerate() {
        let id_hint = raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match ThreadPattern::deserialize(raw) {
            Ok(p) if p.name.trim().is_empty() => diagnostics.push(PatternDiagnostic {
                pattern_id: p.id,
                message: format!("Pattern #{index} has no name"),
            }),
            Ok(p) if p.pattern.is_empty() => diagnostics.push(PatternDiagnostic {
                pattern_id: p.id,
                message: format!("Pattern #{index} has an empty rule"),
            }),
            Ok(p) => patterns.push(p),
            Err(e) => diagnostics.push(PatternDiagnostic {
                pattern_id: id_hint,
                message: format!("Pattern #{index} is malformed: {e}"),
            }),
        }
    }

    for diag in &diagnostics {
        tracing::warn!(pattern_id = %diag.pattern_id, "Skipped bundle entry: {}", diag.message);
    }

    if patterns.is_empty() {
        return Err(PatternError::InvalidBundle {
            reason: "no valid patterns found".to_string(),
        });
    }

    tracing::debug!(
        imported = patterns.len(),
        skipped = diagnostics.len(),
        "Pattern bundle parsed"
    );

    Ok((patterns, diagnostics))
}
