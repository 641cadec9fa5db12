//! Version gating of patch sets.
//!
//! A patch set may declare `version_range = ">=4.0.0, <4.2.0"`; it is skipped
//! when the fixture's version falls outside it. Fixture versions are written
//! loosely in the wild (`v4.0.0`, `4.0`), so they are normalized first.

use semver::{Version, VersionReq};
use std::fmt;
use std::fs;
use std::path::Path;

/// File in the fixture root holding the installed version.
pub const VERSION_FILE: &str = "VERSION";

#[derive(Debug, Clone)]
pub enum VersionError {
    InvalidVersion { value: String, source: String },
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version requirement '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Parse a fixture version, accepting a leading `v` and a missing patch part.
pub fn parse_version(raw: &str) -> Result<Version, VersionError> {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let normalized = match bare.split('.').count() {
        1 if !bare.is_empty() => format!("{bare}.0.0"),
        2 => format!("{bare}.0"),
        _ => bare.to_string(),
    };

    Version::parse(&normalized).map_err(|e| VersionError::InvalidVersion {
        value: raw.to_string(),
        source: e.to_string(),
    })
}

/// Check if a version matches a requirement string.
///
/// ```
/// use fixture_patcher::config::version::matches_requirement;
///
/// assert!(matches_requirement("4.0.0", Some(">=4.0.0")).unwrap());
/// assert!(matches_requirement("v4.1", Some(">=4.0.0, <4.2.0")).unwrap());
/// assert!(!matches_requirement("3.13.2", Some(">=4.0.0")).unwrap());
/// assert!(matches_requirement("1.0.0", None).unwrap());
/// ```
pub fn matches_requirement(
    version: &str,
    requirement: Option<&str>,
) -> Result<bool, VersionError> {
    let Some(req_str) = requirement.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(true);
    };

    let version = parse_version(version)?;
    let req = VersionReq::parse(req_str).map_err(|e| VersionError::InvalidRequirement {
        value: req_str.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(&version))
}

/// Read `<root>/VERSION`, if present and non-empty.
pub fn read_fixture_version(root: &Path) -> Option<String> {
    let raw = fs::read_to_string(root.join(VERSION_FILE)).ok()?;
    let line = raw.lines().next()?.trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_requirement() {
        assert!(matches_requirement("4.0.0", None).unwrap());
        assert!(matches_requirement("4.0.0", Some("  ")).unwrap());
    }

    #[test]
    fn test_loose_versions() {
        assert_eq!(parse_version("v4.0.0").unwrap(), Version::new(4, 0, 0));
        assert_eq!(parse_version("4.1").unwrap(), Version::new(4, 1, 0));
        assert_eq!(parse_version("4").unwrap(), Version::new(4, 0, 0));
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_compound_requirement() {
        let req = ">=4.0.0, <4.2.0";
        assert!(matches_requirement("4.0.0", Some(req)).unwrap());
        assert!(matches_requirement("4.1.3", Some(req)).unwrap());
        assert!(!matches_requirement("4.2.0", Some(req)).unwrap());
        assert!(!matches_requirement("3.13.0", Some(req)).unwrap());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            matches_requirement("not-a-version", Some(">=4.0.0")),
            Err(VersionError::InvalidVersion { .. })
        ));
        assert!(matches!(
            matches_requirement("4.0.0", Some(">=bad")),
            Err(VersionError::InvalidRequirement { .. })
        ));
    }

    #[test]
    fn test_read_fixture_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(read_fixture_version(temp_dir.path()), None);

        fs::write(temp_dir.path().join(VERSION_FILE), "v4.0.0\n").unwrap();
        assert_eq!(
            read_fixture_version(temp_dir.path()),
            Some("v4.0.0".to_string())
        );
    }
}
