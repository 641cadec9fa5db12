//! Patch applicator: runs a patch set against a fixture root.
//!
//! - Filters the set by its version constraint
//! - Groups patches by target file, keeping patch-set order within a file
//! - Applies each patch to the in-memory content, reporting per patch
//! - Writes each changed file back once, atomically

use crate::config::schema::{PatchDefinition, PatchSet};
use crate::config::version::{matches_requirement, VersionError};
use crate::rewrite::{FileRewrite, RewriteError};
use crate::safety::FixtureGuard;
use crate::transform::{self, LineHint, Scope, TransformError};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of applying a single patch
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// Target found and content changed (in check mode: would change)
    Applied { file: PathBuf },
    /// Replacement already present; nothing to do
    AlreadyApplied { file: PathBuf },
    /// Patch set excluded by its version range
    SkippedVersion { reason: String },
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied { file } => write!(f, "Applied patch to {}", file.display()),
            PatchResult::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchResult::SkippedVersion { reason } => write!(f, "Skipped (version): {}", reason),
        }
    }
}

#[derive(Debug)]
pub enum ApplicationError {
    Version(VersionError),
    /// Fixture root itself is unusable
    InvalidRoot { root: PathBuf, reason: String },
    /// Target file does not exist
    MissingFile { file: PathBuf },
    /// Target resolves outside the fixture root or is not a file
    Unsafe { file: PathBuf, reason: String },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Neither the target nor its replacement is present
    NoMatch {
        file: PathBuf,
        hint: Option<LineHint>,
    },
    /// `unique` scope and more than one match
    AmbiguousMatch { file: PathBuf, count: usize },
    /// Query or replacement could not be built
    Pattern { file: PathBuf, reason: String },
    /// Content was computed but could not be written back
    WriteBack { file: PathBuf, reason: String },
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Version(e) => write!(f, "version error: {}", e),
            ApplicationError::InvalidRoot { root, reason } => {
                write!(f, "invalid fixture root {}: {}", root.display(), reason)
            }
            ApplicationError::MissingFile { file } => {
                write!(f, "target file does not exist: {}", file.display())
            }
            ApplicationError::Unsafe { file, reason } => {
                write!(f, "refusing to patch {}: {}", file.display(), reason)
            }
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::NoMatch { file, hint } => {
                write!(f, "query matched no locations in {}", file.display())?;
                if let Some(hint) = hint {
                    write!(
                        f,
                        " (closest line {}: {:?})",
                        hint.line_number, hint.text
                    )?;
                }
                Ok(())
            }
            ApplicationError::AmbiguousMatch { file, count } => write!(
                f,
                "ambiguous query match in {} ({} matches, expected 1)",
                file.display(),
                count
            ),
            ApplicationError::Pattern { file, reason } => {
                write!(f, "invalid patch for {}: {}", file.display(), reason)
            }
            ApplicationError::WriteBack { file, reason } => {
                write!(f, "failed to write {}: {}", file.display(), reason)
            }
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Version(e) => Some(e),
            ApplicationError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<VersionError> for ApplicationError {
    fn from(e: VersionError) -> Self {
        ApplicationError::Version(e)
    }
}

/// Outcome of one patch, keyed by patch id.
pub type PatchOutcome = (String, Result<PatchResult, ApplicationError>);

/// A file whose content a run changed (or, in a dry run, would change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub file: PathBuf,
    pub before: String,
    pub after: String,
}

/// Everything one run of a patch set produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One outcome per patch, in patch-set order
    pub outcomes: Vec<PatchOutcome>,
    /// Changed files, in first-appearance order
    pub changes: Vec<FileChange>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Run a patch set against the fixture under `root`.
///
/// `fixture_version` is checked against `meta.version_range`; with no
/// version the range is not enforced. With `dry_run` nothing is written and
/// `Applied` means "would apply".
pub fn run_patch_set(
    set: &PatchSet,
    root: &Path,
    fixture_version: Option<&str>,
    dry_run: bool,
) -> RunReport {
    run(set, root, fixture_version, !dry_run)
}

/// Apply a patch set, returning one outcome per patch in patch-set order.
pub fn apply_patches(
    set: &PatchSet,
    root: &Path,
    fixture_version: Option<&str>,
) -> Vec<PatchOutcome> {
    run(set, root, fixture_version, true).outcomes
}

/// Same outcomes as [`apply_patches`] without touching any file.
pub fn check_patches(
    set: &PatchSet,
    root: &Path,
    fixture_version: Option<&str>,
) -> Vec<PatchOutcome> {
    run(set, root, fixture_version, false).outcomes
}

fn run(set: &PatchSet, root: &Path, fixture_version: Option<&str>, write: bool) -> RunReport {
    let range = set.meta.version_range.as_deref();

    match fixture_version {
        Some(version) => match matches_requirement(version, range) {
            Ok(true) => {}
            Ok(false) => {
                let reason = format!(
                    "fixture version {version} does not satisfy version_range {}",
                    range.unwrap_or("").trim()
                );
                return report_each(set, |_| {
                    Ok(PatchResult::SkippedVersion {
                        reason: reason.clone(),
                    })
                });
            }
            Err(e) => return report_each(set, |_| Err(ApplicationError::Version(e.clone()))),
        },
        None => {
            if range.is_some_and(|r| !r.trim().is_empty()) {
                warn!(
                    patch_set = %set.meta.name,
                    "fixture version unknown; version_range not enforced"
                );
            }
        }
    }

    let guard = match FixtureGuard::new(root) {
        Ok(guard) => guard,
        Err(e) => {
            let reason = e.to_string();
            return report_each(set, |_| {
                Err(ApplicationError::InvalidRoot {
                    root: root.to_path_buf(),
                    reason: reason.clone(),
                })
            });
        }
    };

    let mut report = RunReport::default();
    for (file_path, patches) in group_by_file(set, guard.root()) {
        let (outcomes, change) = run_file(&guard, &file_path, &patches, write);
        report.outcomes.extend(outcomes);
        report.changes.extend(change);
    }

    // Groups are visited in first-appearance order; restore patch-set order.
    let order: HashMap<&str, usize> = set
        .patches
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.as_str(), i))
        .collect();
    report
        .outcomes
        .sort_by_key(|(id, _)| order.get(id.as_str()).copied().unwrap_or(usize::MAX));

    report
}

/// Same outcome for every patch; nothing changed.
fn report_each(
    set: &PatchSet,
    mut outcome: impl FnMut(&PatchDefinition) -> Result<PatchResult, ApplicationError>,
) -> RunReport {
    RunReport {
        outcomes: set
            .patches
            .iter()
            .map(|patch| (patch.id.clone(), outcome(patch)))
            .collect(),
        changes: Vec::new(),
    }
}

/// Resolve each patch's file and group, preserving first-appearance order.
fn group_by_file<'a>(set: &'a PatchSet, root: &Path) -> Vec<(PathBuf, Vec<&'a PatchDefinition>)> {
    let mut groups: Vec<(PathBuf, Vec<&PatchDefinition>)> = Vec::new();
    // Paths outside the fixture's own layout resolve like any CLI argument.
    let base = if set.meta.root_relative {
        root.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default()
    };

    for patch in &set.patches {
        let file_path = base.join(&patch.file);

        match groups.iter_mut().find(|(path, _)| *path == file_path) {
            Some((_, members)) => members.push(patch),
            None => groups.push((file_path, vec![patch])),
        }
    }

    groups
}

/// Apply every patch of one file against a single read and a single write.
fn run_file(
    guard: &FixtureGuard,
    file_path: &Path,
    patches: &[&PatchDefinition],
    write: bool,
) -> (Vec<PatchOutcome>, Option<FileChange>) {
    let fail_all = |make: &dyn Fn() -> ApplicationError| -> (Vec<PatchOutcome>, Option<FileChange>) {
        let outcomes = patches
            .iter()
            .map(|patch| (patch.id.clone(), Err(make())))
            .collect();
        (outcomes, None)
    };

    if !file_path.exists() {
        return fail_all(&|| ApplicationError::MissingFile {
            file: file_path.to_path_buf(),
        });
    }

    let target = match guard.validate_path(file_path) {
        Ok(target) => target,
        Err(e) => {
            let reason = e.to_string();
            return fail_all(&|| ApplicationError::Unsafe {
                file: file_path.to_path_buf(),
                reason: reason.clone(),
            });
        }
    };

    let original = match fs::read_to_string(&target) {
        Ok(content) => content,
        Err(source) => {
            // io::Error is not Clone; rebuild one per patch from kind + message.
            let kind = source.kind();
            let msg = source.to_string();
            return fail_all(&|| ApplicationError::Io {
                path: file_path.to_path_buf(),
                source: std::io::Error::new(kind, msg.clone()),
            });
        }
    };

    let mut content = original.clone();
    let mut outcomes = Vec::with_capacity(patches.len());

    for patch in patches {
        debug!(patch = %patch.id, file = %file_path.display(), "evaluating patch");
        match patch_content(patch, file_path, &content) {
            Ok((next, result)) => {
                content = next;
                outcomes.push((patch.id.clone(), Ok(result)));
            }
            Err(e) => outcomes.push((patch.id.clone(), Err(e))),
        }
    }

    if content == original {
        return (outcomes, None);
    }

    if write {
        if let Err(e) = FileRewrite::new(&target, &original, content.as_str()).apply() {
            return (fail_written(outcomes, file_path, &e), None);
        }
    }

    let change = FileChange {
        file: file_path.to_path_buf(),
        before: original,
        after: content,
    };
    (outcomes, Some(change))
}

/// A failed write-back turns every `Applied` outcome of the file into an error.
fn fail_written(outcomes: Vec<PatchOutcome>, file_path: &Path, error: &RewriteError) -> Vec<PatchOutcome> {
    let reason = error.to_string();
    outcomes
        .into_iter()
        .map(|(id, outcome)| match outcome {
            Ok(PatchResult::Applied { .. }) => (
                id,
                Err(ApplicationError::WriteBack {
                    file: file_path.to_path_buf(),
                    reason: reason.clone(),
                }),
            ),
            other => (id, other),
        })
        .collect()
}

/// Apply one patch to `content`, returning the new content and its result.
fn patch_content(
    patch: &PatchDefinition,
    file_path: &Path,
    content: &str,
) -> Result<(String, PatchResult), ApplicationError> {
    let pattern_error = |reason: String| ApplicationError::Pattern {
        file: file_path.to_path_buf(),
        reason,
    };

    let matcher = patch
        .query
        .matcher()
        .map_err(|e| pattern_error(e.to_string()))?;
    let replacement = patch
        .operation
        .replacement_text()
        .map_err(|e| pattern_error(e.to_string()))?;
    let scope = patch.operation.scope();

    // A first-only patch that already landed must not move on to the next match.
    if scope == Scope::First && matcher.already_contains(content, &replacement) {
        return Ok((
            content.to_string(),
            PatchResult::AlreadyApplied {
                file: file_path.to_path_buf(),
            },
        ));
    }

    match transform::replace(content, &matcher, &replacement, scope) {
        Ok(out) if out.changed(content) => Ok((
            out.content,
            PatchResult::Applied {
                file: file_path.to_path_buf(),
            },
        )),
        Ok(_) => Ok((
            content.to_string(),
            PatchResult::AlreadyApplied {
                file: file_path.to_path_buf(),
            },
        )),
        Err(TransformError::NoMatch) if matcher.already_contains(content, &replacement) => Ok((
            content.to_string(),
            PatchResult::AlreadyApplied {
                file: file_path.to_path_buf(),
            },
        )),
        Err(TransformError::NoMatch) => Err(ApplicationError::NoMatch {
            file: file_path.to_path_buf(),
            hint: matcher
                .literal()
                .and_then(|literal| transform::closest_line(content, literal)),
        }),
        Err(TransformError::Ambiguous { count }) => Err(ApplicationError::AmbiguousMatch {
            file: file_path.to_path_buf(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Metadata, Operation, Query};

    fn set_of(patches: Vec<PatchDefinition>) -> PatchSet {
        PatchSet {
            meta: Metadata {
                name: "test".to_string(),
                ..Metadata::default()
            },
            patches,
        }
    }

    fn text_patch(id: &str, file: &str, search: &str, text: &str) -> PatchDefinition {
        PatchDefinition {
            id: id.to_string(),
            file: file.to_string(),
            query: Query::Text {
                search: search.to_string(),
            },
            operation: Operation::Replace {
                text: text.to_string(),
                scope: Scope::Unique,
            },
        }
    }

    #[test]
    fn test_version_gate_skips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut set = set_of(vec![text_patch("p", "a.py", "x", "y")]);
        set.meta.version_range = Some(">=4.0.0".to_string());

        let results = apply_patches(&set, temp_dir.path(), Some("3.13.0"));
        assert!(matches!(
            results[0].1,
            Ok(PatchResult::SkippedVersion { .. })
        ));
    }

    #[test]
    fn test_same_file_patches_chain() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "one\n").unwrap();

        let set = set_of(vec![
            text_patch("first", "a.py", "one", "two"),
            text_patch("second", "a.py", "two", "three"),
        ]);
        let results = apply_patches(&set, temp_dir.path(), None);

        assert!(results.iter().all(|(_, r)| matches!(r, Ok(PatchResult::Applied { .. }))));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.py")).unwrap(),
            "three\n"
        );
    }

    #[test]
    fn test_failed_patch_does_not_block_others() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "one\n").unwrap();

        let set = set_of(vec![
            text_patch("missing", "a.py", "absent", "x"),
            text_patch("present", "a.py", "one", "two"),
        ]);
        let results = apply_patches(&set, temp_dir.path(), None);

        assert_eq!(results[0].0, "missing");
        assert!(matches!(results[0].1, Err(ApplicationError::NoMatch { .. })));
        assert!(matches!(results[1].1, Ok(PatchResult::Applied { .. })));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.py")).unwrap(),
            "two\n"
        );
    }

    #[test]
    fn test_results_keep_patch_order_across_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "a\n").unwrap();
        fs::write(temp_dir.path().join("b.py"), "b\n").unwrap();

        let set = set_of(vec![
            text_patch("1", "a.py", "a", "A"),
            text_patch("2", "b.py", "b", "B"),
            text_patch("3", "a.py", "A", "AA"),
        ]);
        let ids: Vec<_> = apply_patches(&set, temp_dir.path(), None)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_check_mode_does_not_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "one\n").unwrap();

        let set = set_of(vec![text_patch("p", "a.py", "one", "two")]);
        let results = check_patches(&set, temp_dir.path(), None);

        assert!(matches!(results[0].1, Ok(PatchResult::Applied { .. })));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.py")).unwrap(),
            "one\n"
        );
    }

    #[test]
    fn test_missing_root() {
        let set = set_of(vec![text_patch("p", "a.py", "x", "y")]);
        let results = apply_patches(&set, Path::new("/nonexistent/fixture/root"), None);
        assert!(matches!(
            results[0].1,
            Err(ApplicationError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_no_match_display_includes_hint() {
        let err = ApplicationError::NoMatch {
            file: PathBuf::from("preprocessor.py"),
            hint: Some(LineHint {
                line_number: 7,
                text: "#x".to_string(),
                similarity: 0.9,
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("closest line 7"));
    }

    #[test]
    fn test_patch_result_display() {
        let applied = PatchResult::Applied {
            file: PathBuf::from("/tmp/a.py"),
        };
        assert!(applied.to_string().contains("Applied"));

        let already = PatchResult::AlreadyApplied {
            file: PathBuf::from("/tmp/a.py"),
        };
        assert!(already.to_string().contains("Already applied"));

        let skipped = PatchResult::SkippedVersion {
            reason: "too old".to_string(),
        };
        assert!(skipped.to_string().contains("Skipped"));
    }
}
