//! Patch sets compiled into the binary.

use crate::config::{load_from_str, ConfigError, PatchSet};

/// Source of the `rbac-white` patch set.
pub const RBAC_WHITE_TOML: &str = include_str!("../patches/rbac_white.toml");

/// Name of the set used when no `--patches` is given.
pub const DEFAULT_SET: &str = "rbac-white";

const BUILTIN: &[(&str, &str)] = &[(DEFAULT_SET, RBAC_WHITE_TOML)];

/// Switch RBAC to white mode, enable the testing hook in the preprocessor,
/// and inject the `rules:read` testing policy into the auth context.
pub fn rbac_white() -> Result<PatchSet, ConfigError> {
    load_from_str(RBAC_WHITE_TOML)
}

/// Look up a built-in patch set by name.
pub fn by_name(name: &str) -> Option<Result<PatchSet, ConfigError>> {
    BUILTIN
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, source)| load_from_str(source))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Operation, Query};
    use crate::transform::Scope;

    #[test]
    fn test_rbac_white_is_valid() {
        let set = rbac_white().unwrap();
        assert_eq!(set.meta.name, DEFAULT_SET);
        assert!(set.meta.root_relative);

        let ids: Vec<_> = set.patches.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "rbac-mode-white",
                "rbac-enable-run-testing",
                "rbac-testing-policies"
            ]
        );
    }

    #[test]
    fn test_mode_patch_is_global() {
        let set = rbac_white().unwrap();
        let mode = &set.patches[0];
        assert!(matches!(mode.query, Query::Regex { .. }));
        assert_eq!(mode.operation.scope(), Scope::All);
    }

    #[test]
    fn test_policy_injection_text() {
        let set = rbac_white().unwrap();
        let inject = &set.patches[2];
        assert!(matches!(inject.operation, Operation::InjectPolicies { .. }));
        assert_eq!(
            inject.operation.replacement_text().unwrap(),
            r#"testing_policies = [{"actions": ["rules:read"], "resources": ["rule:file:0010-rules_config.xml", "rule:file:0015-ossec_rules.xml"], "effect": "allow"}]"#
        );
    }

    #[test]
    fn test_lookup() {
        assert!(by_name(DEFAULT_SET).unwrap().is_ok());
        assert!(by_name("rbac-black").is_none());
        assert_eq!(names().collect::<Vec<_>>(), vec![DEFAULT_SET]);
    }
}
