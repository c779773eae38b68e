//! The Decision Engine (spec §4.3): a pure function over
//! `(request, policies, adapter capabilities, approval mode)`.
//!
//! The engine never persists anything — it builds a [`Decision`] skeleton;
//! turning that into a row with an id, status, and audit trail is
//! `clasper-ledger`'s job.

use serde::{Deserialize, Serialize};

use crate::conditions::{evaluate_condition, resolve_field, TemplateContext};
use crate::model::{EffectDecision, ExecutionRequest, GrantedScopeSpec, Policy};

/// Whether a policy contributed its decision or was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceResult {
    /// All of the policy's conditions held (and its subject/scope matched).
    Matched,
    /// The policy was disabled, out of scope, subject-mismatched, or one of
    /// its conditions failed.
    Skipped,
}

/// One row of a decision's evaluation trace (spec §3 `decision_trace`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTraceEntry {
    /// The policy this entry describes.
    pub policy_id: String,
    /// Whether it matched or was skipped.
    pub result: TraceResult,
    /// The policy's declared decision, present only when matched.
    pub decision: Option<EffectDecision>,
    /// The policy's `explanation`, present only when matched.
    pub explanation: Option<String>,
}

/// Process-wide switch controlling how `require_approval` outcomes are
/// handled (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// `require_approval` is auto-upgraded to `allow`, audited as an override.
    Simulate,
    /// `require_approval` creates a pending decision that blocks the caller.
    Enforce,
}

/// The resolved scope attached to an `allow` decision (spec §3 `granted_scope`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantedScope {
    /// Requested capabilities intersected with what the adapter declared.
    pub capabilities: Vec<String>,
    /// Maximum dispatch steps this grant covers.
    pub max_steps: u64,
    /// Maximum cost (micros) this grant covers.
    pub max_cost_micros: u64,
    /// Absolute expiry, ms since epoch.
    pub expires_at_ms: u64,
}

/// Everything the engine computes for one request. The ledger wraps this in
/// a persisted [`crate::ledger_types::Decision`]-shaped row (defined in
/// `clasper-ledger`, which depends on this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// The winning effect after the deny > require_approval > allow tie-break.
    pub effect: EffectDecision,
    /// Ids of every policy that matched, in evaluation order.
    pub matched_policies: Vec<String>,
    /// True iff the only matched policy was `is_fallback`.
    pub policy_fallback_hit: bool,
    /// Full per-policy trace, in evaluation order.
    pub decision_trace: Vec<DecisionTraceEntry>,
    /// Present when `effect == Deny`.
    pub blocked_reason: Option<String>,
    /// Role required to resolve a pending approval, if the winner declared one.
    pub required_role: Option<String>,
    /// Present when `effect == Allow` (including simulate-mode upgrades).
    pub granted_scope: Option<GrantedScope>,
    /// True when a `require_approval` outcome was upgraded to `allow` by
    /// [`ApprovalMode::Simulate`].
    pub auto_allowed_in_core: bool,
    /// `Some("config_override")` when [`Self::auto_allowed_in_core`] is true.
    pub approval_source: Option<String>,
}

fn scope_matches(policy: &Policy, request: &ExecutionRequest) -> bool {
    if policy.scope.tenant != request.tenant_id {
        return false;
    }
    match &policy.scope.workspace {
        Some(ws) => request.workspace_id.as_deref() == Some(ws.as_str()),
        None => true,
    }
}

fn subject_matches(policy: &Policy, request: &ExecutionRequest) -> bool {
    use crate::model::SubjectType;
    let name = policy.subject.name.as_deref();
    match policy.subject.subject_type {
        SubjectType::Tool => match name {
            Some(n) => request.tool.as_deref() == Some(n),
            None => request.tool.is_some(),
        },
        SubjectType::Capability => match name {
            Some(n) => request.requested_capabilities.iter().any(|c| c == n),
            None => !request.requested_capabilities.is_empty(),
        },
        SubjectType::Skill => match name {
            Some(n) => request.skill.as_deref() == Some(n),
            None => request.skill.is_some(),
        },
        SubjectType::Adapter => match name {
            Some(n) => request.adapter_id == n,
            None => true,
        },
    }
}

fn conditions_hold(policy: &Policy, request: &ExecutionRequest, tmpl: &TemplateContext) -> bool {
    policy
        .conditions
        .iter()
        .all(|(path, spec)| evaluate_condition(spec, resolve_field(request, path).as_ref(), tmpl))
}

/// Evaluate `request` against `policies` (already scoped to the request's
/// tenant/workspace by the caller, e.g. `PolicyStore::list_for`).
///
/// `adapter_capabilities` is the registry's declared capability list for the
/// requesting adapter, used to bound `granted_scope.capabilities` (I2/P4).
#[must_use]
pub fn evaluate(
    request: &ExecutionRequest,
    policies: &[Policy],
    adapter_capabilities: &[String],
    approval_mode: ApprovalMode,
    tmpl: &TemplateContext,
) -> EvaluationOutcome {
    let mut ordered: Vec<&Policy> = policies.iter().collect();
    ordered.sort_by(|a, b| b.precedence.cmp(&a.precedence).then_with(|| a.policy_id.cmp(&b.policy_id)));

    let mut trace = Vec::with_capacity(ordered.len());
    let mut matches: Vec<&Policy> = Vec::new();

    for policy in &ordered {
        let eligible = policy.enabled && scope_matches(policy, request) && subject_matches(policy, request);
        if eligible && conditions_hold(policy, request, tmpl) {
            trace.push(DecisionTraceEntry {
                policy_id: policy.policy_id.clone(),
                result: TraceResult::Matched,
                decision: Some(policy.effect.decision),
                explanation: policy.explanation.clone(),
            });
            matches.push(policy);
        } else {
            trace.push(DecisionTraceEntry {
                policy_id: policy.policy_id.clone(),
                result: TraceResult::Skipped,
                decision: None,
                explanation: None,
            });
        }
    }

    let winner: Option<&Policy> = {
        let max_severity = matches.iter().map(|p| p.effect.decision.severity()).max();
        max_severity.and_then(|sev| matches.iter().find(|p| p.effect.decision.severity() == sev).copied())
    };

    let matched_policies: Vec<String> = matches.iter().map(|p| p.policy_id.clone()).collect();
    let policy_fallback_hit = matches.len() == 1 && matches[0].is_fallback;

    let mut effect = winner.map_or(EffectDecision::Allow, |p| p.effect.decision);
    let required_role = winner.and_then(|p| p.effect.required_role.clone());

    let mut auto_allowed_in_core = false;
    let mut approval_source = None;
    if effect == EffectDecision::RequireApproval && approval_mode == ApprovalMode::Simulate {
        effect = EffectDecision::Allow;
        auto_allowed_in_core = true;
        approval_source = Some("config_override".to_string());
    }

    let blocked_reason = (effect == EffectDecision::Deny).then(|| {
        winner
            .and_then(|p| p.explanation.clone())
            .unwrap_or_else(|| "denied by policy".to_string())
    });

    let granted_scope = (effect == EffectDecision::Allow).then(|| {
        let overrides: GrantedScopeSpec = winner.and_then(|p| p.effect.granted_scope.clone()).unwrap_or_default();
        let mut capabilities: Vec<String> = request
            .requested_capabilities
            .iter()
            .filter(|c| adapter_capabilities.iter().any(|a| a == *c))
            .cloned()
            .collect();
        capabilities.sort();
        capabilities.dedup();
        let now_ms = clasper_core::ids::now_ms();
        GrantedScope {
            capabilities,
            max_steps: overrides.max_steps.unwrap_or(clasper_budget::DEFAULT_MAX_STEPS),
            max_cost_micros: overrides.max_cost_micros.unwrap_or(clasper_budget::DEFAULT_MAX_COST_MICROS),
            expires_at_ms: now_ms + overrides.ttl_secs.map_or(clasper_budget::DEFAULT_GRANT_TTL_MS, |s| s * 1000),
        }
    });

    EvaluationOutcome {
        effect,
        matched_policies,
        policy_fallback_hit,
        decision_trace: trace,
        blocked_reason,
        required_role,
        granted_scope,
        auto_allowed_in_core,
        approval_source,
    }
}
