//! Operator surface: `/ops/api/policies`, `/ops/api/decisions/reconcile`,
//! `/ops/api/me` (spec.md §6).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use clasper_core::identity::TenantId;
use clasper_core::stable_json;
use clasper_ledger::{ApprovalType, ResolveAction};
use clasper_policy::{evaluate, EffectDecision, ExecutionRequest, Policy, TemplateContext};

use crate::auth_extract::Operator;
use crate::error::ServerError;
use crate::state::AppState;

fn hash_summary(policy: &Policy) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_json::stringify(&serde_json::to_value(policy).unwrap_or_default()).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Deserialize, Default)]
struct WizardMeta {
    #[serde(default)]
    wizard_acknowledged_allow: bool,
}

#[derive(Deserialize)]
pub struct UpsertPolicyBody {
    #[serde(flatten)]
    policy: Policy,
    #[serde(default)]
    _wizard_meta: Option<WizardMeta>,
    #[serde(default)]
    _source_trace_id: Option<String>,
}

#[derive(Serialize)]
pub struct UpsertPolicyResponse {
    policy: Policy,
    auto_resolved_decision_id: Option<String>,
}

/// Create or update a policy via the wizard surface. Wizard-created `allow`
/// policies require an explicit acknowledgment (spec.md §6): unacknowledged
/// allow policies are rejected with no side effects.
pub async fn upsert_policy(
    State(app): State<AppState>,
    _operator: Operator,
    Json(body): Json<UpsertPolicyBody>,
) -> Result<Json<UpsertPolicyResponse>, ServerError> {
    if body.policy.effect.decision == EffectDecision::Allow
        && !body._wizard_meta.as_ref().map(|m| m.wizard_acknowledged_allow).unwrap_or(false)
    {
        return Err(ServerError::wizard_ack_required(
            "allow policies created via the wizard require _wizard_meta.wizard_acknowledged_allow = true",
        ));
    }

    if !app.config.policy_operators_enabled && body.policy.conditions.values().any(clasper_policy::ConditionSpec::is_advanced) {
        return Err(ServerError::validation(
            "conditions using in/prefix/all_under/any_under/exists require CLASPER_POLICY_OPERATORS=true; this deployment only accepts literal-equality conditions",
        ));
    }

    let before = app.policies.get(&body.policy.policy_id);
    let event_type = if before.is_some() { "policy_updated_via_wizard" } else { "policy_created_via_wizard" };
    let before_hash = before.as_ref().map(hash_summary);

    app.policies.upsert(body.policy.clone());
    let after_hash = hash_summary(&body.policy);

    let _ = app.audit.append(
        &TenantId::from(body.policy.scope.tenant.as_str()),
        event_type,
        serde_json::json!({
            "policy_id": body.policy.policy_id,
            "before_hash": before_hash,
            "after_hash": after_hash,
        }),
        clasper_audit::Linkage::default(),
    );

    let mut auto_resolved_decision_id = None;
    if let Some(decision_id) = &body._source_trace_id {
        if let Some(decision) = app.ledger.get(decision_id) {
            if !decision.status.is_terminal() {
                if let Ok(request) = serde_json::from_value::<ExecutionRequest>(decision.request_snapshot.clone()) {
                    let tenant = TenantId::from(decision.tenant_id.as_str());
                    let policies = app.policies.list_for(&tenant.0, decision.workspace_id.as_deref());
                    let adapter_caps = app
                        .registry
                        .get(&tenant, &decision.adapter_id, None)
                        .map(|a| a.capabilities)
                        .unwrap_or_default();
                    let outcome = evaluate(&request, &policies, &adapter_caps, app.config.approval_mode, &TemplateContext::default());
                    if outcome.effect == EffectDecision::Allow {
                        if let Ok(resolved) = app.ledger.resolve_decision(
                            &app.audit,
                            decision_id,
                            ResolveAction::Approve,
                            "policy_exception_created".to_string(),
                            ApprovalType::Local,
                            None,
                        ) {
                            auto_resolved_decision_id = Some(resolved.decision_id);
                        }
                    }
                }
            }
        }
    }

    Ok(Json(UpsertPolicyResponse { policy: body.policy, auto_resolved_decision_id }))
}

#[derive(Deserialize)]
pub struct ReconcileBody {
    pub tenant_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

/// Re-evaluate every pending decision for `(tenant, workspace)` against the
/// current policy store (spec.md §4.4 `reconcilePending`).
pub async fn reconcile(
    State(app): State<AppState>,
    _operator: Operator,
    Json(body): Json<ReconcileBody>,
) -> Json<clasper_ledger::ReconcileResult> {
    let tenant = TenantId::from(body.tenant_id.as_str());
    let result = app.ledger.reconcile_pending(
        &app.audit,
        &app.policies,
        &app.registry,
        &tenant,
        body.workspace_id.as_deref(),
        app.config.approval_mode,
    );
    Json(result)
}

#[derive(Serialize)]
pub struct MeResponse {
    operator_id: &'static str,
    tenant_id: String,
    permissions: Vec<&'static str>,
}

/// The local operator identity (spec.md §6): single-operator, always
/// `policy:manage`.
pub async fn me(State(app): State<AppState>, _operator: Operator) -> Json<MeResponse> {
    Json(MeResponse {
        operator_id: "local-operator",
        tenant_id: app.config.local_tenant_id.clone(),
        permissions: vec!["policy:manage", "decisions:resolve", "decisions:reconcile"],
    })
}
