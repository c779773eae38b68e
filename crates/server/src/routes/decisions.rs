//! `POST /api/decisions/:decision_id/resolve` (spec.md §6, §4.4).

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use clasper_ledger::{ApprovalType, ResolveAction};

use crate::auth_extract::Operator;
use crate::error::ServerError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ResolveBody {
    pub action: ResolveAction,
    pub justification: String,
    #[serde(default)]
    pub approval_type: Option<ApprovalType>,
}

/// Operator action on a pending decision.
pub async fn resolve(
    State(app): State<AppState>,
    _operator: Operator,
    Path(decision_id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<clasper_ledger::Decision>, ServerError> {
    let decision = app.ledger.resolve_decision(
        &app.audit,
        &decision_id,
        body.action,
        body.justification,
        body.approval_type.unwrap_or(ApprovalType::Local),
        None,
    )?;
    Ok(Json(decision))
}
