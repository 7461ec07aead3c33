// LogThreads - app/pattern_store.rs
//
// Loads the user pattern file on top of the built-in patterns and writes
// registries back out as bundles.
// User patterns with the same id as a built-in replace it in place; new ids
// are appended in file order.

use crate::core::bundle::{self, ExportScope};
use crate::core::model::{PatternDiagnostic, ThreadPattern};
use crate::core::pattern::{self, PatternRegistry};
use crate::util::constants;
use crate::util::error::PatternError;
use std::path::Path;

/// Build the working registry: built-ins first, then the user file.
///
/// A missing file is not an error. An unreadable or invalid file leaves the
/// built-ins in place and is reported as a diagnostic, as are skipped entries
/// and registry-level problems.
pub fn load_patterns(user_file: Option<&Path>) -> (PatternRegistry, Vec<PatternDiagnostic>) {
    let mut patterns = pattern::default_patterns();
    let mut diagnostics = Vec::new();

    tracing::info!(builtin_count = patterns.len(), "Loaded built-in patterns");

    if let Some(path) = user_file {
        if path.is_file() {
            match read_bundle_file(path) {
                Ok((user_patterns, skipped)) => {
                    diagnostics.extend(skipped);
                    patterns = merge_patterns(patterns, user_patterns);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring pattern file");
                    diagnostics.push(PatternDiagnostic {
                        pattern_id: String::new(),
                        message: e.to_string(),
                    });
                }
            }
        } else {
            tracing::debug!(
                path = %path.display(),
                "User pattern file does not exist (skipping)"
            );
        }
    }

    if patterns.len() > constants::MAX_PATTERNS {
        tracing::warn!(
            count = patterns.len(),
            max = constants::MAX_PATTERNS,
            "Too many patterns loaded, truncating"
        );
        diagnostics.push(PatternDiagnostic {
            pattern_id: String::new(),
            message: PatternError::TooMany {
                count: patterns.len(),
                max: constants::MAX_PATTERNS,
            }
            .to_string(),
        });
        patterns.truncate(constants::MAX_PATTERNS);
    }

    let registry = PatternRegistry::new(patterns);
    diagnostics.extend(registry.diagnostics().iter().cloned());

    tracing::info!(
        total = registry.len(),
        active = registry.active().count(),
        "Pattern loading complete"
    );

    (registry, diagnostics)
}

/// Overlay `overrides` onto `base` by id.
pub fn merge_patterns(
    mut base: Vec<ThreadPattern>,
    overrides: Vec<ThreadPattern>,
) -> Vec<ThreadPattern> {
    for user_pattern in overrides {
        if let Some(pos) = base.iter().position(|p| p.id == user_pattern.id) {
            tracing::info!(pattern_id = %user_pattern.id, "User pattern overrides built-in");
            base[pos] = user_pattern;
        } else {
            tracing::debug!(pattern_id = %user_pattern.id, "Loaded user-defined pattern");
            base.push(user_pattern);
        }
    }
    base
}

/// Read and parse one bundle file, enforcing the size limit.
pub fn read_bundle_file(
    path: &Path,
) -> Result<(Vec<ThreadPattern>, Vec<PatternDiagnostic>), PatternError> {
    let io_err = |source| PatternError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = std::fs::metadata(path).map_err(io_err)?.len();
    if size > constants::MAX_PATTERN_FILE_SIZE {
        return Err(PatternError::InvalidBundle {
            reason: format!(
                "file is {size} bytes, maximum is {}",
                constants::MAX_PATTERN_FILE_SIZE
            ),
        });
    }

    let content = std::fs::read_to_string(path).map_err(io_err)?;
    bundle::import_bundle(&content)
}

/// Write a registry to `path` as a bundle.
///
/// The file is written to a sibling temp file and renamed into place, so an
/// interrupted save leaves the previous file intact. Parent directories are
/// created as needed.
pub fn save_patterns(
    registry: &PatternRegistry,
    scope: ExportScope,
    path: &Path,
) -> Result<(), PatternError> {
    let json = bundle::bundle_to_json(&bundle::export_bundle(registry, scope))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PatternError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json.as_bytes()).map_err(|source| PatternError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        PatternError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::info!(path = %path.display(), patterns = registry.len(), "Patterns saved");
    Ok(())
}
