//! Authorization policy values injected into RBAC test doubles.
//!
//! Policies are rendered as a single-line list literal with `", "` between
//! items and `": "` after keys, e.g.
//!
//! ```
//! use fixture_patcher::policy::{render_policy_list, Effect, Policy};
//!
//! let policy = Policy {
//!     actions: vec!["rules:read".into()],
//!     resources: vec!["rule:file:0010-rules_config.xml".into()],
//!     effect: Effect::Allow,
//! };
//! assert_eq!(
//!     render_policy_list(&[policy]).unwrap(),
//!     r#"[{"actions": ["rules:read"], "resources": ["rule:file:0010-rules_config.xml"], "effect": "allow"}]"#
//! );
//! ```

use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use std::io;
use thiserror::Error;

/// One RBAC policy. Field order is the rendered key order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Policy {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub effect: Effect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to serialize policies: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("serialized policies are not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Compact, single-line JSON with a space after each separator.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Render `policies` as a one-line list literal.
pub fn render_policy_list(policies: &[Policy]) -> Result<String, PolicyError> {
    let mut buf = Vec::with_capacity(128 * policies.len().max(1));
    let mut ser = Serializer::with_formatter(&mut buf, SpacedFormatter);
    policies.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}
