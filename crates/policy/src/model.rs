//! Request envelope and policy shapes evaluated by the Decision Engine.
//!
//! These types are the Rust encoding of spec §3's `ExecutionRequest`/`Policy`
//! rows; the server deserializes requests straight into [`ExecutionRequest`]
//! and the policy admin surface deserializes into [`Policy`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conditions::ConditionSpec;

/// Resolved paths/hosts a request is targeting.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Targets {
    /// Absolute filesystem paths the tool call touches.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Hostnames the tool call reaches out to.
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Shell-exec-specific context, present only for exec-family tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecFields {
    /// First whitespace-delimited token of the command string.
    pub argv0: Option<String>,
    /// Full token list of the command.
    #[serde(default)]
    pub argv: Vec<String>,
    /// Working directory the command runs in.
    pub cwd: Option<String>,
}

/// Coarse side-effect flags derived by the shim from the tool's category.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SideEffects {
    /// True for write-family or exec-family tools.
    #[serde(default)]
    pub writes_possible: bool,
    /// Mirrors `external_network`.
    #[serde(default)]
    pub network_possible: bool,
}

/// The `context` object of an [`ExecutionRequest`] (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionContext {
    /// Whether this invocation can reach the network.
    #[serde(default)]
    pub external_network: bool,
    /// Whether this invocation can write files.
    #[serde(default)]
    pub writes_files: bool,
    /// Presence of `sudo`/`--privileged` tokens in the command.
    #[serde(default)]
    pub elevated_privileges: bool,
    /// First recognized package-manager token, if any.
    pub package_manager: Option<String>,
    /// Resolved targets of this invocation.
    #[serde(default)]
    pub targets: Targets,
    /// Exec-family details, `None` for non-exec tools.
    pub exec: Option<ExecFields>,
    /// Derived side-effect flags.
    #[serde(default)]
    pub side_effects: SideEffects,
}

/// Where a request originated, when the adapter can report it.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Provenance {
    /// E.g. `"skill"`, `"user"`, `"agent_plan"`.
    pub source: Option<String>,
}

/// One side-effect request from an adapter (spec §3 `ExecutionRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Caller-assigned or shim-reused execution id (UUIDv7).
    pub execution_id: String,
    /// Adapter making the request.
    pub adapter_id: String,
    /// Tenant scope.
    pub tenant_id: String,
    /// Workspace scope, if the deployment pins one.
    pub workspace_id: Option<String>,
    /// Capabilities this invocation needs.
    #[serde(default)]
    pub requested_capabilities: Vec<String>,
    /// Normalized tool name.
    pub tool: Option<String>,
    /// Coarse tool grouping, if the adapter declares one.
    pub tool_group: Option<String>,
    /// Skill this invocation runs under, if any.
    pub skill: Option<String>,
    /// Heuristic free-text intent, if the adapter supplies one.
    pub intent: Option<String>,
    /// Structured side-effect context.
    #[serde(default)]
    pub context: ExecutionContext,
    /// Provenance of the request, if known.
    pub provenance: Option<Provenance>,
}

/// `subject.type` (spec §4.3): the class of thing a policy is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// Matches on `request.tool`.
    Tool,
    /// Matches on `request.requested_capabilities`.
    Capability,
    /// Matches on `request.skill`.
    Skill,
    /// Matches on `request.adapter_id`.
    Adapter,
}

/// What a policy's conditions are evaluated about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// The class of thing this policy concerns.
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    /// A specific name within that class; `None` matches any value present.
    #[serde(default)]
    pub name: Option<String>,
}

/// The decision a matched policy contributes (spec §3 `Decision.effect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectDecision {
    /// Permit the invocation.
    Allow,
    /// Block the invocation.
    Deny,
    /// Hold the invocation for an operator decision.
    RequireApproval,
}

impl EffectDecision {
    /// Severity used for the deny > require_approval > allow tie-break.
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::RequireApproval => 1,
            Self::Deny => 2,
        }
    }

    /// Wire string as used in HTTP bodies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }
}

/// Overrides a matched policy can attach to a `granted_scope`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GrantedScopeSpec {
    /// Overrides [`clasper_budget::DEFAULT_MAX_STEPS`].
    pub max_steps: Option<u64>,
    /// Overrides [`clasper_budget::DEFAULT_MAX_COST_MICROS`].
    pub max_cost_micros: Option<u64>,
    /// Overrides [`clasper_budget::DEFAULT_GRANT_TTL_MS`], in seconds.
    pub ttl_secs: Option<u64>,
}

/// What a matched policy prescribes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    /// The decision this policy contributes when matched.
    pub decision: EffectDecision,
    /// Role required to resolve a pending approval raised by this policy.
    #[serde(default)]
    pub required_role: Option<String>,
    /// Overrides applied to the `granted_scope` when this policy wins.
    #[serde(default)]
    pub granted_scope: Option<GrantedScopeSpec>,
}

/// Tenant/workspace scope a policy applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyScope {
    /// Tenant this policy is installed for.
    pub tenant: String,
    /// Workspace this policy is pinned to, or `None` for tenant-wide.
    #[serde(default)]
    pub workspace: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A declarative rule (spec §3 `Policy`, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Stable identifier, unique within the store.
    pub policy_id: String,
    /// Tenant/workspace this policy is scoped to.
    pub scope: PolicyScope,
    /// What class of request this policy concerns.
    pub subject: Subject,
    /// Field-path predicates, all of which must hold for a match.
    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionSpec>,
    /// What happens when this policy matches.
    pub effect: Effect,
    /// Higher wins within the same decision class.
    #[serde(default)]
    pub precedence: i64,
    /// Disabled policies are skipped but still appear in the trace.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Human-readable rationale surfaced in the decision trace and UI.
    #[serde(default)]
    pub explanation: Option<String>,
    /// Marks this as the catch-all rule installed to close the default-allow
    /// gap (spec §4.3); affects `policy_fallback_hit` only.
    #[serde(default)]
    pub is_fallback: bool,
}

/// A YAML document of policies, as loaded by [`crate::store::PolicyStore`].
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyFile {
    /// The policies declared in this file.
    pub policies: Vec<Policy>,
}
