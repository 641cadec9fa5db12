use crate::policy::{render_policy_list, Policy, PolicyError};
use crate::transform::{Matcher, Scope};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Placeholder in an `inject-policies` template for the rendered list.
pub const POLICIES_TOKEN: &str = "{policies}";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        if let Some(range) = self.meta.version_range.as_deref() {
            if !range.trim().is_empty() {
                if let Err(e) = semver::VersionReq::parse(range.trim()) {
                    issues.push(ValidationIssue::InvalidCombo {
                        patch_id: None,
                        message: format!("invalid version_range '{range}': {e}"),
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            let id = Some(patch.id.clone());

            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(patch.id.clone()));
            }

            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: id.clone(),
                    field: "file",
                });
            }

            match &patch.query {
                Query::Text { search } => {
                    if search.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "query.search",
                        });
                    }
                }
                Query::Line { line } => {
                    if line.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "query.line",
                        });
                    }
                    if line.contains('\n') {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id.clone(),
                            message: "line query must be a single line".to_string(),
                        });
                    }
                }
                Query::Regex { pattern } => {
                    if pattern.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "query.pattern",
                        });
                    } else if let Err(e) = Regex::new(pattern) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id.clone(),
                            message: format!("invalid regex: {e}"),
                        });
                    }
                }
            }

            match &patch.operation {
                Operation::Replace { text, .. } => {
                    if matches!(patch.query, Query::Line { .. }) && text.contains('\n') {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id.clone(),
                            message: "line query replacement must be a single line".to_string(),
                        });
                    }
                }
                Operation::InjectPolicies { template, policies } => {
                    if !template.contains(POLICIES_TOKEN) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id.clone(),
                            message: format!("template must contain {POLICIES_TOKEN}"),
                        });
                    }
                    if policies.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "operation.policies",
                        });
                    }
                    for (idx, policy) in policies.iter().enumerate() {
                        if policy.actions.is_empty() {
                            issues.push(ValidationIssue::InvalidCombo {
                                patch_id: id.clone(),
                                message: format!("policy #{} has no actions", idx + 1),
                            });
                        }
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version_range: Option<String>,
    /// Resolve `file` against the fixture root (default) instead of the cwd.
    #[serde(default = "default_root_relative")]
    pub root_relative: bool,
}

fn default_root_relative() -> bool {
    true
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            version_range: None,
            root_relative: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    pub file: String,
    pub query: Query,
    pub operation: Operation,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Query {
    /// Literal substring
    Text { search: String },
    /// Exact full line
    Line { line: String },
    /// Regular expression
    Regex { pattern: String },
}

impl Query {
    pub fn matcher(&self) -> Result<Matcher, regex::Error> {
        Ok(match self {
            Query::Text { search } => Matcher::Text(search.clone()),
            Query::Line { line } => Matcher::Line(line.clone()),
            Query::Regex { pattern } => Matcher::Regex(Regex::new(pattern)?),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    Replace {
        text: String,
        #[serde(default)]
        scope: Scope,
    },
    /// Replace the first match with `template`, where `{policies}` is the
    /// rendered policy list.
    InjectPolicies {
        template: String,
        policies: Vec<Policy>,
    },
}

impl Operation {
    pub fn scope(&self) -> Scope {
        match self {
            Operation::Replace { scope, .. } => *scope,
            Operation::InjectPolicies { .. } => Scope::First,
        }
    }

    /// The literal text every match is replaced with.
    pub fn replacement_text(&self) -> Result<String, PolicyError> {
        match self {
            Operation::Replace { text, .. } => Ok(text.clone()),
            Operation::InjectPolicies { template, policies } => {
                let rendered = render_policy_list(policies)?;
                Ok(template.replace(POLICIES_TOKEN, &rendered))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPatchList,
    DuplicateId(String),
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch set contains no patches"),
            ValidationIssue::DuplicateId(id) => write!(f, "duplicate patch id '{id}'"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch set: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Effect;

    fn patch(id: &str, query: Query, operation: Operation) -> PatchDefinition {
        PatchDefinition {
            id: id.to_string(),
            file: "api/configuration.py".to_string(),
            query,
            operation,
        }
    }

    fn replace(text: &str) -> Operation {
        Operation::Replace {
            text: text.to_string(),
            scope: Scope::Unique,
        }
    }

    #[test]
    fn test_empty_set_is_invalid() {
        let err = PatchSet::default().validate().unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::EmptyPatchList]);
    }

    #[test]
    fn test_duplicate_ids() {
        let set = PatchSet {
            meta: Metadata::default(),
            patches: vec![
                patch("a", Query::Text { search: "x".into() }, replace("y")),
                patch("a", Query::Text { search: "z".into() }, replace("y")),
            ],
        };
        let err = set.validate().unwrap_err();
        assert!(err
            .issues
            .contains(&ValidationIssue::DuplicateId("a".to_string())));
    }

    #[test]
    fn test_bad_regex_reported() {
        let set = PatchSet {
            meta: Metadata::default(),
            patches: vec![patch(
                "mode",
                Query::Regex {
                    pattern: "(unclosed".into(),
                },
                replace("y"),
            )],
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn test_inject_requires_token_and_policies() {
        let set = PatchSet {
            meta: Metadata::default(),
            patches: vec![patch(
                "inject",
                Query::Text {
                    search: "testing_policies = []".into(),
                },
                Operation::InjectPolicies {
                    template: "testing_policies = []".into(),
                    policies: vec![],
                },
            )],
        };
        let err = set.validate().unwrap_err();
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn test_invalid_version_range() {
        let set = PatchSet {
            meta: Metadata {
                version_range: Some(">=bad".into()),
                ..Metadata::default()
            },
            patches: vec![patch("a", Query::Text { search: "x".into() }, replace("y"))],
        };
        assert!(set.validate().unwrap_err().to_string().contains("version_range"));
    }

    #[test]
    fn test_inject_replacement_text() {
        let op = Operation::InjectPolicies {
            template: "testing_policies = {policies}".into(),
            policies: vec![Policy {
                actions: vec!["rules:read".into()],
                resources: vec!["rule:file:x.xml".into()],
                effect: Effect::Allow,
            }],
        };
        assert_eq!(op.scope(), Scope::First);
        assert_eq!(
            op.replacement_text().unwrap(),
            r#"testing_policies = [{"actions": ["rules:read"], "resources": ["rule:file:x.xml"], "effect": "allow"}]"#
        );
    }

    #[test]
    fn test_metadata_defaults_to_root_relative() {
        assert!(Metadata::default().root_relative);
    }
}
