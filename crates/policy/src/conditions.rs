//! The six condition operators (spec §4.3) and field-path resolution over an
//! [`ExecutionRequest`](crate::model::ExecutionRequest).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ExecutionRequest;

/// One condition operator, deserialized from a policy's `conditions` map.
///
/// `serde(untagged)` tries variants top-to-bottom; the operator-tagged
/// struct variants are listed before the bare-literal [`ConditionSpec::Equals`]
/// catch-all so e.g. `{in: [...]}` is never accidentally swallowed as a
/// literal JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    /// `in: [v, ...]` — field value is one of the literals.
    In {
        #[serde(rename = "in")]
        values: Vec<Value>,
    },
    /// `prefix: s` — string field starts with `s`.
    Prefix {
        /// The required prefix.
        prefix: String,
    },
    /// `all_under: [root, ...]` — every value in a string-list field
    /// descends from one of the given roots.
    AllUnder {
        /// Root paths (template vars substituted before evaluation).
        all_under: Vec<String>,
    },
    /// `any_under: [root, ...]` — at least one value descends from a root.
    AnyUnder {
        /// Root paths (template vars substituted before evaluation).
        any_under: Vec<String>,
    },
    /// `exists: bool` — field is present (`true`) or absent (`false`).
    Exists {
        /// Expected presence.
        exists: bool,
    },
    /// A bare literal: field value equals this literal exactly.
    Equals(Value),
}

impl ConditionSpec {
    /// `true` for every operator except bare literal equality — the
    /// operators gated behind `CLASPER_POLICY_OPERATORS` (spec.md §6).
    #[must_use]
    pub fn is_advanced(&self) -> bool {
        !matches!(self, ConditionSpec::Equals(_))
    }
}

/// Template substitution context. `{{workspace.root}}` is replaced once,
/// before condition evaluation, per spec §4.3.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Substituted for `{{workspace.root}}`.
    pub workspace_root: Option<String>,
}

fn substitute(raw: &str, tmpl: &TemplateContext) -> String {
    match &tmpl.workspace_root {
        Some(root) => raw.replace("{{workspace.root}}", root),
        None => raw.to_string(),
    }
}

fn normalize_components(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn path_is_under(candidate: &str, roots: &[String]) -> bool {
    let cand = normalize_components(candidate);
    roots.iter().any(|root| {
        let root_norm = normalize_components(root);
        cand.len() >= root_norm.len() && cand[..root_norm.len()] == root_norm[..]
    })
}

/// Evaluate one condition against the resolved field value. A missing field
/// (`value == None`) never satisfies a positive operator.
#[must_use]
pub fn evaluate_condition(spec: &ConditionSpec, value: Option<&Value>, tmpl: &TemplateContext) -> bool {
    match spec {
        ConditionSpec::Equals(expected) => value == Some(expected),
        ConditionSpec::In { values } => value.is_some_and(|v| values.contains(v)),
        ConditionSpec::Prefix { prefix } => value
            .and_then(Value::as_str)
            .is_some_and(|s| s.starts_with(prefix.as_str())),
        ConditionSpec::AllUnder { all_under } => {
            let roots: Vec<String> = all_under.iter().map(|r| substitute(r, tmpl)).collect();
            match value.and_then(Value::as_array) {
                Some(items) => items
                    .iter()
                    .all(|v| v.as_str().is_some_and(|s| path_is_under(s, &roots))),
                None => false,
            }
        }
        ConditionSpec::AnyUnder { any_under } => {
            let roots: Vec<String> = any_under.iter().map(|r| substitute(r, tmpl)).collect();
            match value.and_then(Value::as_array) {
                Some(items) => items
                    .iter()
                    .any(|v| v.as_str().is_some_and(|s| path_is_under(s, &roots))),
                None => false,
            }
        }
        ConditionSpec::Exists { exists } => value.is_some() == *exists,
    }
}

/// Resolve a dotted field path against a request. Unknown paths resolve to
/// `None`, which is treated as "not matching" by every positive operator.
#[must_use]
pub fn resolve_field(request: &ExecutionRequest, path: &str) -> Option<Value> {
    match path {
        "tool" => request.tool.clone().map(Value::String),
        "tool_group" => request.tool_group.clone().map(Value::String),
        "skill" => request.skill.clone().map(Value::String),
        "intent" => request.intent.clone().map(Value::String),
        "adapter_id" => Some(Value::String(request.adapter_id.clone())),
        "requested_capabilities" => Some(serde_json::to_value(&request.requested_capabilities).ok()?),
        "context.external_network" => Some(Value::Bool(request.context.external_network)),
        "context.writes_files" => Some(Value::Bool(request.context.writes_files)),
        "context.elevated_privileges" => Some(Value::Bool(request.context.elevated_privileges)),
        "context.package_manager" => request.context.package_manager.clone().map(Value::String),
        "context.targets.paths" => Some(serde_json::to_value(&request.context.targets.paths).ok()?),
        "context.targets.hosts" => Some(serde_json::to_value(&request.context.targets.hosts).ok()?),
        "context.exec.argv0" => request.context.exec.as_ref()?.argv0.clone().map(Value::String),
        "context.exec.argv" => Some(serde_json::to_value(&request.context.exec.as_ref()?.argv).ok()?),
        "context.exec.cwd" => request.context.exec.as_ref()?.cwd.clone().map(Value::String),
        "context.side_effects.writes_possible" => Some(Value::Bool(request.context.side_effects.writes_possible)),
        "context.side_effects.network_possible" => Some(Value::Bool(request.context.side_effects.network_possible)),
        "provenance.source" => request.provenance.as_ref()?.source.clone().map(Value::String),
        _ => None,
    }
}
