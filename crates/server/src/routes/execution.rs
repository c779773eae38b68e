//! `POST /api/execution/request` and `GET /api/execution/:execution_id`
//! (spec.md §6, §4.3, §4.4).

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use clasper_core::identity::{TenantId, WorkspaceId};
use clasper_ledger::CreateDecisionInput;
use clasper_policy::{evaluate, ExecutionRequest, TemplateContext};

use crate::auth_extract::Adapter;
use crate::error::ServerError;
use crate::state::AppState;

/// Evaluate a request and persist the resulting decision (I1: every
/// decision's `execution_id` is pinned to exactly one adapter/tenant/workspace).
pub async fn request_decision(
    State(app): State<AppState>,
    Adapter(ctx): Adapter,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<clasper_ledger::Decision>, ServerError> {
    if request.adapter_id != ctx.adapter_id {
        return Err(ServerError::validation("adapter_id does not match the presented token"));
    }
    if request.tenant_id != ctx.tenant_id {
        return Err(ServerError::validation("tenant_id does not match the presented token"));
    }

    let workspace = request.workspace_id.clone().or_else(|| ctx.workspace_id.clone());
    let policies = app.policies.list_for(&request.tenant_id, workspace.as_deref());
    let tmpl = TemplateContext::default();
    let outcome = evaluate(&request, &policies, &ctx.allowed_capabilities, app.config.approval_mode, &tmpl);

    let decision = app.ledger.create_decision(
        &app.audit,
        CreateDecisionInput {
            tenant_id: TenantId::from(request.tenant_id.as_str()),
            workspace_id: workspace.as_deref().map(WorkspaceId::from),
            execution_id: request.execution_id.clone(),
            adapter_id: request.adapter_id.clone(),
            tool: request.tool.clone(),
            tool_group: request.tool_group.clone(),
            outcome,
            approval_mode: app.config.approval_mode,
            request_snapshot: serde_json::to_value(&request).unwrap_or_default(),
        },
    );

    Ok(Json(decision))
}

#[derive(Serialize)]
pub struct ExecutionStatus {
    execution_id: String,
    effect: clasper_policy::EffectDecision,
    decision_id: String,
    approval_type: Option<clasper_ledger::ApprovalType>,
}

/// Used by the shim's approval poll loop (spec.md §4.6).
pub async fn get_execution(
    State(app): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionStatus>, ServerError> {
    let decision = app
        .ledger
        .get_by_execution_id(&execution_id)
        .ok_or_else(|| ServerError::not_found(format!("unknown execution_id: {execution_id}")))?;
    Ok(Json(ExecutionStatus {
        execution_id: decision.execution_id,
        effect: decision.effect,
        decision_id: decision.decision_id,
        approval_type: decision.resolution.map(|r| r.approval_type),
    }))
}
