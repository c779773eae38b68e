//! Decision Ledger and Tool Authorizations Ledger (spec.md §4.4, §4.5).
//!
//! Turns a pure [`clasper_policy::EvaluationOutcome`] into a persisted,
//! stateful [`Decision`] row with an id, a lifecycle (`pending` ->
//! `{approved,denied,rejected}`), and an append-only
//! [`ToolAuthorization`] record — writing exactly one audit entry per
//! mutation into the shared [`clasper_audit::AuditChain`] (I5).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use clasper_audit::{AuditChain, Linkage};
use clasper_core::identity::{TenantId, WorkspaceId};
use clasper_policy::{ApprovalMode, DecisionTraceEntry, EffectDecision, EvaluationOutcome, GrantedScope};
use clasper_registry::Registry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The decision id does not exist.
    #[error("decision not found: {0}")]
    NotFound(String),
    /// A local approval's `justification` was shorter than 10 characters.
    #[error("justification must be at least 10 characters")]
    JustificationTooShort,
}

/// Lifecycle state of a [`Decision`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Awaiting operator resolution.
    Pending,
    /// Resolved allow — either by policy at creation time, or by operator
    /// approval of a pending decision.
    Approved,
    /// Denied by policy at creation time (never was pending).
    Denied,
    /// Was pending, resolved to deny by an operator (or reconciliation).
    Rejected,
}

impl DecisionStatus {
    /// `true` once the row is immutable (I4).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// `resolveDecision`'s caller-supplied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Approve a pending decision.
    Approve,
    /// Deny a pending decision.
    Deny,
}

/// Whether a resolution came from the local operator or an external
/// (cloud) approval path. Spec §4.4: local approvals are explicitly
/// self-attested, never an external proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    /// Resolved by the local operator.
    Local,
    /// Resolved via an external (cloud) approval path.
    Cloud,
}

/// Recorded outcome of `resolveDecision` (spec §3 `Decision.resolution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// The action taken.
    pub action: ResolveAction,
    /// Operator-supplied rationale (>= 10 chars for local approvals).
    pub justification: String,
    /// Local vs. cloud approval path.
    pub approval_type: ApprovalType,
    /// When the resolution was recorded, ms since epoch.
    pub resolved_at: u64,
    /// Resolver identity, if known (`None` for reconciliation auto-resolves).
    pub resolver_id: Option<String>,
}

/// The authoritative outcome for one execution (spec §3 `Decision`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Fresh identifier minted at creation.
    pub decision_id: String,
    /// The execution this decision concerns.
    pub execution_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Workspace scope, if pinned.
    pub workspace_id: Option<String>,
    /// Adapter that issued the request.
    pub adapter_id: String,
    /// Current authoritative effect. Starts as the engine's outcome
    /// (`require_approval` while pending); overwritten to `allow`/`deny`
    /// on resolution.
    pub effect: EffectDecision,
    /// Present iff `effect == Allow` (I2).
    pub granted_scope: Option<GrantedScope>,
    /// Ids of every policy that matched, in evaluation order.
    pub matched_policies: Vec<String>,
    /// True iff the only matched policy was the installed fallback.
    pub policy_fallback_hit: bool,
    /// Full per-policy evaluation trace.
    pub decision_trace: Vec<DecisionTraceEntry>,
    /// Present when the engine's outcome was `deny`.
    pub blocked_reason: Option<String>,
    /// Role required to resolve a pending approval, if declared.
    pub required_role: Option<String>,
    /// The approval mode in effect when this decision was created.
    pub approval_mode: ApprovalMode,
    /// `true` when a `require_approval` outcome was auto-upgraded to
    /// `allow` by [`ApprovalMode::Simulate`].
    pub auto_allowed_in_core: bool,
    /// `Some("config_override")` iff `auto_allowed_in_core`.
    pub approval_source: Option<String>,
    /// Current lifecycle state.
    pub status: DecisionStatus,
    /// The `ExecutionRequest` this decision was computed over, as JSON.
    pub request_snapshot: Value,
    /// Present once resolved by an operator or reconciliation.
    pub resolution: Option<Resolution>,
    /// Creation timestamp, ms since epoch.
    pub created_at: u64,
    /// Last-mutated timestamp, ms since epoch.
    pub updated_at: u64,
}

/// A per-request record of one tool's ruling (spec §3 `ToolAuthorization`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuthorization {
    /// The execution this row belongs to.
    pub execution_id: String,
    /// The adapter that issued the request.
    pub adapter_id: String,
    /// Normalized tool name.
    pub tool: String,
    /// Coarse tool grouping, if declared.
    pub tool_group: Option<String>,
    /// The resolved effect for this tool.
    pub decision: EffectDecision,
    /// The first matched policy, if any.
    pub policy_id: Option<String>,
    /// Human-readable reason (blocked_reason or the winning policy's explanation).
    pub reason: Option<String>,
    /// Present iff `decision == Allow`.
    pub granted_scope: Option<GrantedScope>,
    /// Mirrors `granted_scope.expires_at_ms`, if present.
    pub expires_at: Option<u64>,
    /// Creation timestamp, ms since epoch.
    pub created_at: u64,
}

/// Input to [`DecisionLedger::create_decision`]: an execution request's
/// identity plus the engine's pure evaluation of it.
pub struct CreateDecisionInput {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Workspace scope, if pinned.
    pub workspace_id: Option<WorkspaceId>,
    /// The execution this decision concerns.
    pub execution_id: String,
    /// Adapter that issued the request.
    pub adapter_id: String,
    /// Normalized tool name, for the `ToolAuthorization` row.
    pub tool: Option<String>,
    /// Tool grouping, for the `ToolAuthorization` row.
    pub tool_group: Option<String>,
    /// The engine's pure evaluation of the request.
    pub outcome: EvaluationOutcome,
    /// The approval mode in effect when evaluation ran.
    pub approval_mode: ApprovalMode,
    /// The `ExecutionRequest` this decision was computed over, as JSON.
    pub request_snapshot: Value,
}

fn audit_event_type(decision: &Decision) -> &'static str {
    match (decision.status, decision.auto_allowed_in_core) {
        (DecisionStatus::Denied, _) => "tool_execution_blocked",
        (DecisionStatus::Approved, true) => "policy_decision_auto_allowed",
        (DecisionStatus::Approved, false) => "policy_decision_allowed",
        (DecisionStatus::Pending, _) => "policy_decision_pending",
        (DecisionStatus::Rejected, _) => "policy_decision_rejected",
    }
}

/// Decision Ledger + Tool Authorizations Ledger: persistent state of
/// pending/approved/denied decisions keyed by `decision_id`, indexed by
/// `execution_id`, plus the append-only per-tool observability table.
#[derive(Clone, Default)]
pub struct DecisionLedger {
    decisions: Arc<DashMap<String, Decision>>,
    by_execution: Arc<DashMap<String, String>>,
    tool_authorizations: Arc<DashMap<(String, String), ToolAuthorization>>,
}

impl DecisionLedger {
    /// Construct an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist the engine's evaluation as a new [`Decision`] row, write its
    /// [`ToolAuthorization`], and append one audit entry.
    pub fn create_decision(&self, audit: &AuditChain, input: CreateDecisionInput) -> Decision {
        let now = clasper_core::ids::now_ms();
        let status = match input.outcome.effect {
            EffectDecision::Allow => DecisionStatus::Approved,
            EffectDecision::Deny => DecisionStatus::Denied,
            EffectDecision::RequireApproval => DecisionStatus::Pending,
        };
        let decision = Decision {
            decision_id: clasper_core::ids::new_id("decision"),
            execution_id: input.execution_id.clone(),
            tenant_id: input.tenant_id.0.clone(),
            workspace_id: input.workspace_id.as_ref().map(|w| w.0.clone()),
            adapter_id: input.adapter_id.clone(),
            effect: input.outcome.effect,
            granted_scope: input.outcome.granted_scope.clone(),
            matched_policies: input.outcome.matched_policies.clone(),
            policy_fallback_hit: input.outcome.policy_fallback_hit,
            decision_trace: input.outcome.decision_trace.clone(),
            blocked_reason: input.outcome.blocked_reason.clone(),
            required_role: input.outcome.required_role.clone(),
            approval_mode: input.approval_mode,
            auto_allowed_in_core: input.outcome.auto_allowed_in_core,
            approval_source: input.outcome.approval_source.clone(),
            status,
            request_snapshot: input.request_snapshot,
            resolution: None,
            created_at: now,
            updated_at: now,
        };

        clasper_policy::record_decision(&decision.tenant_id, &input.outcome);

        if let Some(tool) = &input.tool {
            let reason = decision.blocked_reason.clone().or_else(|| {
                let first = decision.matched_policies.first()?;
                decision
                    .decision_trace
                    .iter()
                    .find(|e| &e.policy_id == first)
                    .and_then(|e| e.explanation.clone())
            });
            let auth = ToolAuthorization {
                execution_id: decision.execution_id.clone(),
                adapter_id: decision.adapter_id.clone(),
                tool: tool.clone(),
                tool_group: input.tool_group.clone(),
                decision: decision.effect,
                policy_id: decision.matched_policies.first().cloned(),
                reason,
                granted_scope: decision.granted_scope.clone(),
                expires_at: decision.granted_scope.as_ref().map(|g| g.expires_at_ms),
                created_at: now,
            };
            self.tool_authorizations.insert((decision.execution_id.clone(), tool.clone()), auth);
        }

        let event_type = audit_event_type(&decision);
        let _ = audit.append(
            &input.tenant_id,
            event_type,
            serde_json::to_value(&decision).unwrap_or(Value::Null),
            Linkage {
                execution_id: Some(decision.execution_id.clone()),
                trace_id: None,
                workspace_id: decision.workspace_id.clone(),
            },
        );

        self.by_execution.insert(decision.execution_id.clone(), decision.decision_id.clone());
        self.decisions.insert(decision.decision_id.clone(), decision.clone());
        decision
    }

    /// The most recently created decision for an execution id.
    #[must_use]
    pub fn get_by_execution_id(&self, execution_id: &str) -> Option<Decision> {
        let decision_id = self.by_execution.get(execution_id)?.clone();
        self.decisions.get(&decision_id).map(|r| r.clone())
    }

    /// Fetch a decision by its own id.
    #[must_use]
    pub fn get(&self, decision_id: &str) -> Option<Decision> {
        self.decisions.get(decision_id).map(|r| r.clone())
    }

    /// Resolve a pending decision. Terminal rows reject re-resolution as an
    /// idempotent no-op returning the current state (P5); local approvals
    /// require a `justification` of at least 10 characters.
    pub fn resolve_decision(
        &self,
        audit: &AuditChain,
        decision_id: &str,
        action: ResolveAction,
        justification: String,
        approval_type: ApprovalType,
        resolver_id: Option<String>,
    ) -> Result<Decision, LedgerError> {
        if matches!(approval_type, ApprovalType::Local) && justification.trim().len() < 10 {
            return Err(LedgerError::JustificationTooShort);
        }

        let mut entry =
            self.decisions.get_mut(decision_id).ok_or_else(|| LedgerError::NotFound(decision_id.to_string()))?;

        if entry.status.is_terminal() {
            return Ok(entry.clone());
        }

        let before = entry.clone();
        let now = clasper_core::ids::now_ms();
        entry.status = match action {
            ResolveAction::Approve => DecisionStatus::Approved,
            ResolveAction::Deny => DecisionStatus::Rejected,
        };
        entry.effect = match action {
            ResolveAction::Approve => EffectDecision::Allow,
            ResolveAction::Deny => EffectDecision::Deny,
        };
        if matches!(action, ResolveAction::Approve) && entry.granted_scope.is_none() {
            entry.granted_scope = Some(GrantedScope {
                capabilities: Vec::new(),
                max_steps: clasper_budget::DEFAULT_MAX_STEPS,
                max_cost_micros: clasper_budget::DEFAULT_MAX_COST_MICROS,
                expires_at_ms: now + clasper_budget::DEFAULT_GRANT_TTL_MS,
            });
        }
        entry.resolution = Some(Resolution { action, justification, approval_type, resolved_at: now, resolver_id });
        entry.updated_at = now;
        let after = entry.clone();
        drop(entry);

        self.by_execution.insert(after.execution_id.clone(), after.decision_id.clone());

        let tenant = TenantId::from(after.tenant_id.as_str());
        let _ = audit.append(
            &tenant,
            "policy_decision_resolved",
            serde_json::json!({"before": before, "after": after}),
            Linkage {
                execution_id: Some(after.execution_id.clone()),
                trace_id: None,
                workspace_id: after.workspace_id.clone(),
            },
        );

        Ok(after)
    }

    /// Re-evaluate every pending decision for `(tenant, workspace)` against
    /// the current policy store; auto-resolve any whose new verdict is
    /// `allow` or `deny` (spec §4.4 `reconcilePending`).
    pub fn reconcile_pending(
        &self,
        audit: &AuditChain,
        policies: &clasper_policy::PolicyStore,
        registry: &Registry,
        tenant: &TenantId,
        workspace: Option<&str>,
        approval_mode: ApprovalMode,
    ) -> ReconcileResult {
        let mut resolved_decision_ids = Vec::new();
        let pending_ids: Vec<String> = self
            .decisions
            .iter()
            .filter(|e| {
                e.value().tenant_id == tenant.0
                    && e.value().workspace_id.as_deref() == workspace
                    && !e.value().status.is_terminal()
            })
            .map(|e| e.key().clone())
            .collect();

        for decision_id in pending_ids {
            let Some(decision) = self.decisions.get(&decision_id).map(|r| r.clone()) else { continue };
            let Ok(request) = serde_json::from_value::<clasper_policy::ExecutionRequest>(decision.request_snapshot.clone())
            else {
                continue;
            };
            let policy_rows = policies.list_for(&tenant.0, workspace);
            let adapter_caps = registry
                .get(tenant, &decision.adapter_id, None)
                .map(|a| a.capabilities)
                .unwrap_or_default();
            let outcome = clasper_policy::evaluate(
                &request,
                &policy_rows,
                &adapter_caps,
                approval_mode,
                &clasper_policy::TemplateContext::default(),
            );
            let action = match outcome.effect {
                EffectDecision::Allow => Some(ResolveAction::Approve),
                EffectDecision::Deny => Some(ResolveAction::Deny),
                EffectDecision::RequireApproval => None,
            };
            if let Some(action) = action {
                if let Ok(resolved) = self.resolve_decision(
                    audit,
                    &decision_id,
                    action,
                    "policy_exception_created".to_string(),
                    ApprovalType::Local,
                    None,
                ) {
                    resolved_decision_ids.push(resolved.decision_id);
                }
            }
        }

        ReconcileResult { resolved_count: resolved_decision_ids.len(), resolved_decision_ids }
    }

    /// All `ToolAuthorization` rows for an execution, in insertion order.
    #[must_use]
    pub fn tool_authorizations_for(&self, execution_id: &str) -> Vec<ToolAuthorization> {
        self.tool_authorizations
            .iter()
            .filter(|e| e.key().0 == execution_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

/// Result of [`DecisionLedger::reconcile_pending`] (spec §6
/// `/ops/api/decisions/reconcile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Number of decisions auto-resolved.
    pub resolved_count: usize,
    /// Ids of the decisions auto-resolved.
    pub resolved_decision_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clasper_policy::{evaluate, ExecutionContext, ExecutionRequest};

    fn req(tool: &str) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: "e1".into(),
            adapter_id: "a1".into(),
            tenant_id: "t1".into(),
            workspace_id: None,
            requested_capabilities: vec![tool.to_string()],
            tool: Some(tool.to_string()),
            tool_group: None,
            skill: None,
            intent: None,
            context: ExecutionContext::default(),
            provenance: None,
        }
    }

    fn ledger_audit() -> (DecisionLedger, AuditChain, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (DecisionLedger::new(), AuditChain::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn allow_decision_is_immediately_approved() {
        let (ledger, audit, _dir) = ledger_audit();
        let request = req("read");
        let outcome = evaluate(&request, &[], &["read".into()], ApprovalMode::Enforce, &clasper_policy::TemplateContext::default());
        let decision = ledger.create_decision(
            &audit,
            CreateDecisionInput {
                tenant_id: TenantId::from("t1"),
                workspace_id: None,
                execution_id: "e1".into(),
                adapter_id: "a1".into(),
                tool: Some("read".into()),
                tool_group: None,
                outcome,
                approval_mode: ApprovalMode::Enforce,
                request_snapshot: serde_json::to_value(&request).unwrap(),
            },
        );
        assert_eq!(decision.status, DecisionStatus::Approved);
        assert!(decision.granted_scope.is_some());
        assert_eq!(ledger.tool_authorizations_for("e1").len(), 1);
    }

    #[test]
    fn pending_resolves_then_rejects_re_resolution() {
        let (ledger, audit, _dir) = ledger_audit();
        let request = req("exec");
        let mut outcome = evaluate(&request, &[], &["exec".into()], ApprovalMode::Enforce, &clasper_policy::TemplateContext::default());
        outcome.effect = EffectDecision::RequireApproval;
        let decision = ledger.create_decision(
            &audit,
            CreateDecisionInput {
                tenant_id: TenantId::from("t1"),
                workspace_id: None,
                execution_id: "e2".into(),
                adapter_id: "a1".into(),
                tool: Some("exec".into()),
                tool_group: None,
                outcome,
                approval_mode: ApprovalMode::Enforce,
                request_snapshot: serde_json::to_value(&request).unwrap(),
            },
        );
        assert_eq!(decision.status, DecisionStatus::Pending);

        let resolved = ledger
            .resolve_decision(
                &audit,
                &decision.decision_id,
                ResolveAction::Approve,
                "ok for test, looks fine".into(),
                ApprovalType::Local,
                Some("operator-1".into()),
            )
            .unwrap();
        assert_eq!(resolved.status, DecisionStatus::Approved);
        assert_eq!(resolved.effect, EffectDecision::Allow);

        // Re-resolution is a no-op (P5), even with a conflicting action.
        let again = ledger
            .resolve_decision(&audit, &decision.decision_id, ResolveAction::Deny, "whatever justification".into(), ApprovalType::Local, None)
            .unwrap();
        assert_eq!(again.status, DecisionStatus::Approved);
    }

    #[test]
    fn short_justification_is_rejected() {
        let (ledger, audit, _dir) = ledger_audit();
        let request = req("exec");
        let mut outcome = evaluate(&request, &[], &["exec".into()], ApprovalMode::Enforce, &clasper_policy::TemplateContext::default());
        outcome.effect = EffectDecision::RequireApproval;
        let decision = ledger.create_decision(
            &audit,
            CreateDecisionInput {
                tenant_id: TenantId::from("t1"),
                workspace_id: None,
                execution_id: "e3".into(),
                adapter_id: "a1".into(),
                tool: Some("exec".into()),
                tool_group: None,
                outcome,
                approval_mode: ApprovalMode::Enforce,
                request_snapshot: serde_json::to_value(&request).unwrap(),
            },
        );
        let err = ledger
            .resolve_decision(&audit, &decision.decision_id, ResolveAction::Approve, "short".into(), ApprovalType::Local, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::JustificationTooShort));
    }

    #[test]
    fn reconcile_pending_auto_resolves_on_new_policy() {
        let (ledger, audit, _dir) = ledger_audit();
        let registry = Registry::new();
        let request = req("exec");
        let mut outcome = evaluate(&request, &[], &["exec".into()], ApprovalMode::Enforce, &clasper_policy::TemplateContext::default());
        outcome.effect = EffectDecision::RequireApproval;
        let decision = ledger.create_decision(
            &audit,
            CreateDecisionInput {
                tenant_id: TenantId::from("t1"),
                workspace_id: None,
                execution_id: "e4".into(),
                adapter_id: "a1".into(),
                tool: Some("exec".into()),
                tool_group: None,
                outcome,
                approval_mode: ApprovalMode::Enforce,
                request_snapshot: serde_json::to_value(&request).unwrap(),
            },
        );
        assert_eq!(decision.status, DecisionStatus::Pending);

        let policies = clasper_policy::PolicyStore::new();
        policies.upsert(clasper_policy::Policy {
            policy_id: "allow-exec-now".into(),
            scope: clasper_policy::PolicyScope { tenant: "t1".into(), workspace: None },
            subject: clasper_policy::Subject { subject_type: clasper_policy::SubjectType::Tool, name: Some("exec".into()) },
            conditions: Default::default(),
            effect: clasper_policy::Effect { decision: EffectDecision::Allow, required_role: None, granted_scope: None },
            precedence: 10,
            enabled: true,
            explanation: None,
            is_fallback: false,
        });

        let result = ledger.reconcile_pending(&audit, &policies, &registry, &TenantId::from("t1"), None, ApprovalMode::Enforce);
        assert_eq!(result.resolved_count, 1);
        let final_decision = ledger.get_by_execution_id("e4").unwrap();
        assert_eq!(final_decision.status, DecisionStatus::Approved);
        assert_eq!(final_decision.resolution.unwrap().justification, "policy_exception_created");
    }
}
