//! `POST /api/ingest/{trace|audit|cost|metrics|violation}` (spec.md §6, §4.7).

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use clasper_telemetry::{AuditEnvelope, CostEnvelope, IngestOutcome, MetricsEnvelope, TraceEnvelope, ViolationEnvelope};

use crate::auth_extract::Adapter;
use crate::state::AppState;

#[derive(Serialize)]
pub struct IngestResponse {
    status: &'static str,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(o: IngestOutcome) -> Self {
        Self { status: if matches!(o, IngestOutcome::Ok) { "ok" } else { "duplicate" } }
    }
}

pub async fn ingest_trace(
    State(app): State<AppState>,
    _adapter: Adapter,
    Json(envelope): Json<TraceEnvelope>,
) -> Json<IngestResponse> {
    Json(app.ingest.ingest_trace(&app.audit, envelope).into())
}

pub async fn ingest_audit(
    State(app): State<AppState>,
    _adapter: Adapter,
    Json(envelope): Json<AuditEnvelope>,
) -> Json<IngestResponse> {
    Json(app.ingest.ingest_audit(&app.audit, envelope).into())
}

pub async fn ingest_cost(
    State(app): State<AppState>,
    _adapter: Adapter,
    Json(envelope): Json<CostEnvelope>,
) -> Json<IngestResponse> {
    Json(app.ingest.ingest_cost(&app.audit, &app.budgets, envelope).into())
}

pub async fn ingest_metrics(
    State(app): State<AppState>,
    _adapter: Adapter,
    Json(envelope): Json<MetricsEnvelope>,
) -> Json<IngestResponse> {
    Json(app.ingest.ingest_metrics(envelope).into())
}

pub async fn ingest_violation(
    State(app): State<AppState>,
    _adapter: Adapter,
    Json(envelope): Json<ViolationEnvelope>,
) -> Json<IngestResponse> {
    Json(app.ingest.ingest_violation(&app.audit, envelope).into())
}
