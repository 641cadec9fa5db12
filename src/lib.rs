//! Fixture Patcher: declarative, idempotent patching of installed files
//! for integration test fixtures.
//!
//! A *patch set* (TOML) lists ordered patches. Each names a target file
//! under a fixture root, a query (literal text, exact line, or regex) and
//! an operation (replace, or inject a rendered RBAC policy list). The
//! built-in `rbac-white` set switches an RBAC-enabled API to white mode
//! and injects a fixed testing policy.
//!
//! # Guarantees
//!
//! - Every patch reports whether it changed its target; a missing target
//!   is an error, never a silent no-op
//! - Re-running a patch set is a no-op (`AlreadyApplied`)
//! - Each file is read once and written once, atomically
//!   (tempfile + fsync + rename), and only if unchanged since it was read
//! - Targets must resolve inside the fixture root
//!
//! # Example
//!
//! ```no_run
//! use fixture_patcher::{apply_patches, builtin, PatchResult};
//! use std::path::Path;
//!
//! let set = builtin::rbac_white().unwrap();
//! for (id, result) in apply_patches(&set, Path::new("/opt/fixture"), None) {
//!     match result {
//!         Ok(PatchResult::Applied { file }) => println!("{id}: patched {}", file.display()),
//!         Ok(other) => println!("{id}: {other}"),
//!         Err(e) => eprintln!("{id}: {e}"),
//!     }
//! }
//! ```

pub mod builtin;
pub mod config;
pub mod policy;
pub mod rewrite;
pub mod safety;
pub mod transform;

// Re-exports
pub use config::{
    apply_patches, check_patches, load_all, load_from_path, load_from_str, matches_requirement,
    run_patch_set, ApplicationError, ConfigError, FileChange, PatchOutcome, PatchResult,
    PatchSet, RunReport, VersionError,
};
pub use policy::{render_policy_list, Effect, Policy, PolicyError};
pub use rewrite::{FileRewrite, RewriteError, RewriteResult};
pub use safety::{FixtureGuard, SafetyError};
pub use transform::{LineHint, Matcher, Scope};
