use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Whole-file write-back with stale-content detection.
///
/// Transforms run against an in-memory snapshot of the file. A rewrite
/// carries a fingerprint of that snapshot and refuses to write if the file
/// on disk no longer matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "FileRewrite does nothing until apply() is called"]
pub struct FileRewrite {
    /// Target path (already resolved against the fixture root)
    pub file: PathBuf,
    /// Content to write
    pub new_content: String,
    /// Fingerprint of the content the transforms started from
    pub expected_before: ContentFingerprint,
}

/// How the original content is remembered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentFingerprint {
    /// Full copy of the original text
    Exact(String),
    /// xxh3 hash of the original text
    Hash(u64),
}

impl ContentFingerprint {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ContentFingerprint::Exact(expected) => text == expected,
            ContentFingerprint::Hash(expected) => xxh3_64(text.as_bytes()) == *expected,
        }
    }

    /// Keep small files verbatim, hash anything over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            ContentFingerprint::Hash(xxh3_64(text.as_bytes()))
        } else {
            ContentFingerprint::Exact(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("{0} changed on disk since it was read; refusing to overwrite")]
    Stale(PathBuf),

    #[error("{0} has no parent directory")]
    NoParent(PathBuf),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 validation error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RewriteResult should be checked"]
pub enum RewriteResult {
    /// New content was written
    Written { file: PathBuf, bytes: usize },
    /// File already held the new content
    Unchanged { file: PathBuf },
}

impl FileRewrite {
    pub fn new(
        file: impl Into<PathBuf>,
        original: &str,
        new_content: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            new_content: new_content.into(),
            expected_before: ContentFingerprint::from_text(original),
        }
    }

    /// Write the new content atomically, re-checking the file first.
    pub fn apply(&self) -> Result<RewriteResult, RewriteError> {
        let current = String::from_utf8(fs::read(&self.file)?)?;

        if current == self.new_content {
            return Ok(RewriteResult::Unchanged {
                file: self.file.clone(),
            });
        }

        if !self.expected_before.matches(&current) {
            return Err(RewriteError::Stale(self.file.clone()));
        }

        atomic_write(&self.file, self.new_content.as_bytes())?;

        // Bump mtime so anything caching compiled sources (e.g. .pyc) reloads.
        filetime::set_file_mtime(&self.file, filetime::FileTime::now())?;

        debug!(
            file = %self.file.display(),
            bytes = self.new_content.len(),
            "rewrote file"
        );

        Ok(RewriteResult::Written {
            file: self.file.clone(),
            bytes: self.new_content.len(),
        })
    }
}

/// tempfile in the same directory + fsync + rename.
///
/// Keeps the original file's permissions; a crash leaves either the old or
/// the new content, never a truncated file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), RewriteError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(RewriteError::NoParent(path.to_path_buf()));
    }

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions)?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
