pub mod applicator;
pub mod loader;
pub mod schema;
pub mod version;

pub use applicator::{
    apply_patches, check_patches, run_patch_set, ApplicationError, FileChange, PatchOutcome,
    PatchResult, RunReport,
};
pub use loader::{discover, load_all, load_from_path, load_from_str, ConfigError};
pub use schema::{
    Metadata, Operation, PatchDefinition, PatchSet, Query, ValidationError, ValidationIssue,
    POLICIES_TOKEN,
};
pub use version::{matches_requirement, parse_version, read_fixture_version, VersionError};
