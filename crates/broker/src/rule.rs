//! Permission rules — immutable predicates that pre-answer tool
//! invocations at session, profile or global scope.

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::Serialize;

use ah_domain::store::{RuleDecision, StoredRule};

/// The domain a rule is consulted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum RuleScope {
    Session(String),
    Profile(String),
    Global,
}

/// A saved permission rule. Never mutated after install.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRule {
    pub id: String,
    #[serde(flatten)]
    pub scope: RuleScope,
    /// Exact tool identifier, or `*` for any tool.
    pub tool_name: String,
    /// Optional glob applied to the tool's designated input field.
    /// Absent means "any input for this tool".
    pub tool_pattern: Option<String>,
    pub decision: RuleDecision,
    pub created_at: DateTime<Utc>,
}

impl PermissionRule {
    /// Does this rule decide the given tool invocation?
    pub fn matches(&self, tool_name: &str, tool_input: &serde_json::Value) -> bool {
        if self.tool_name != tool_name && self.tool_name != "*" {
            return false;
        }

        let pattern = match self.tool_pattern.as_deref() {
            None | Some("") => return true,
            Some(p) => p,
        };

        match designated_field(tool_name) {
            Some(fields) => fields
                .iter()
                .find_map(|field| non_empty_str(tool_input, field))
                .is_some_and(|value| glob_match(pattern, value)),
            // Unknown tool: match against any string value in the input.
            None => tool_input
                .as_object()
                .map(|object| {
                    object
                        .values()
                        .filter_map(|value| value.as_str())
                        .any(|value| glob_match(pattern, value))
                })
                .unwrap_or(false),
        }
    }
}

impl From<StoredRule> for PermissionRule {
    fn from(stored: StoredRule) -> Self {
        let scope = match stored.profile_id {
            Some(profile_id) => RuleScope::Profile(profile_id),
            None => RuleScope::Global,
        };
        Self {
            id: stored.id,
            scope,
            tool_name: stored.tool_name,
            tool_pattern: stored.tool_pattern,
            decision: stored.decision,
            created_at: stored.created_at,
        }
    }
}

/// The input field a pattern is applied to, per tool.
fn designated_field(tool_name: &str) -> Option<&'static [&'static str]> {
    match tool_name {
        "Bash" => Some(&["command"]),
        "Read" | "Write" | "Edit" | "Glob" => Some(&["file_path", "path"]),
        "Grep" => Some(&["path"]),
        "WebFetch" => Some(&["url"]),
        _ => None,
    }
}

fn non_empty_str<'a>(input: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    input
        .get(field)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
}

/// Unix-shell-style glob, anchored to the full string.
fn glob_match(pattern: &str, value: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(pattern) => pattern.matches(value),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid permission rule pattern");
            false
        }
    }
}
