use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keeps every patched path inside the fixture root.
#[derive(Debug, Clone)]
pub struct FixtureGuard {
    /// Canonical fixture root
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside fixture root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FixtureGuard {
    /// The root is canonicalized so symlinked roots compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|source| SafetyError::Canonicalize {
                path: root.to_path_buf(),
                source,
            })?;
        Ok(Self { root })
    }

    /// Resolve `path` (relative paths against the root) and check it.
    ///
    /// Returns the canonical path of an existing regular file inside the root.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let canonical = absolute
            .canonicalize()
            .map_err(|source| SafetyError::Canonicalize {
                path: absolute.clone(),
                source,
            })?;

        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideRoot {
                path: canonical,
                root: self.root.clone(),
            });
        }

        if !canonical.is_file() {
            return Err(SafetyError::NotAFile(canonical));
        }

        Ok(canonical)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
