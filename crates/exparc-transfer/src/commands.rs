//! Command template engine.
//!
//! Each logical remote operation is a named template. Placeholders are
//! written `${name}` (or `$name`) and `$$` stands for a literal `$`.
//! Substitution is partial: placeholders with no matching parameter are left
//! verbatim. Templates may be overridden per location.
//!
//! Documented placeholders: `${path}`, `${dirname}`, `${filename}`,
//! `${username}`, `${hostname}`, `${opts}`, `${local}`, `${remote}`.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::traits::{TransferError, TransferResult};

pub const ECHO: &str = "echo";
pub const MKDIRS: &str = "mkdirs";
pub const LENGTH: &str = "length";
pub const REMOVE: &str = "remove";
pub const SCP_FROM: &str = "scp_from";
pub const SCP_TO: &str = "scp_to";
pub const SSH: &str = "ssh";
pub const PRE_PUT_FILE: &str = "pre_put_file";
pub const POST_PUT_FILE: &str = "post_put_file";
pub const PRE_PUT_ARCHIVE: &str = "pre_put_archive";
pub const POST_PUT_ARCHIVE: &str = "post_put_archive";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (ECHO, "echo hi"),
    (MKDIRS, r#"mkdir -p "${path}""#),
    (LENGTH, r#"stat --format="%s" "${path}""#),
    (REMOVE, r#"rm "${path}""#),
    (
        SCP_FROM,
        r#"scp ${opts} ${username}@${hostname}:"${remote}" "${local}""#,
    ),
    (
        SCP_TO,
        r#"scp ${opts} "${local}" ${username}@${hostname}:"${remote}""#,
    ),
    (
        SSH,
        "ssh -o PasswordAuthentication=no ${opts} ${username}@${hostname}",
    ),
];

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([_a-zA-Z][_a-zA-Z0-9]*)\}|([_a-zA-Z][_a-zA-Z0-9]*))")
            .unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {e}"))
    })
}

/// Substitute `params` into `template`, leaving unknown placeholders as written.
pub fn safe_substitute(template: &str, params: &HashMap<&str, String>) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match name.and_then(|n| params.get(n)) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Operation name → template mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplates(BTreeMap<String, String>);

impl Default for CommandTemplates {
    fn default() -> Self {
        Self(
            DEFAULT_TEMPLATES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl CommandTemplates {
    /// Default templates with `overrides` applied on top. Overrides may also
    /// introduce hook operations that have no default.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut templates = Self::default();
        for (op, template) in overrides {
            templates.0.insert(op.clone(), template.clone());
        }
        templates
    }

    /// Template for `op`. An empty template counts as not configured.
    pub fn get(&self, op: &str) -> Option<&str> {
        self.0
            .get(op)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
    }

    /// Render `op` with `params`.
    ///
    /// Returns `Ok(None)` when `op` has no template and is optional, and a
    /// `MissingCommand` error when it has none and is required.
    pub fn render(
        &self,
        op: &str,
        params: &HashMap<&str, String>,
        optional: bool,
    ) -> TransferResult<Option<String>> {
        match self.get(op) {
            Some(template) => Ok(Some(safe_substitute(template, params))),
            None if optional => Ok(None),
            None => Err(TransferError::MissingCommand(op.to_string())),
        }
    }
}
