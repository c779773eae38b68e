//! Route wiring: one axum [`Router`] over [`crate::state::AppState`].

mod adapters;
mod decisions;
mod execution;
mod health;
mod ingest;
mod ops;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full control-plane router (spec.md §6).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/adapters/register", post(adapters::register))
        .route("/api/execution/request", post(execution::request_decision))
        .route("/api/execution/:execution_id", get(execution::get_execution))
        .route("/api/ingest/trace", post(ingest::ingest_trace))
        .route("/api/ingest/audit", post(ingest::ingest_audit))
        .route("/api/ingest/cost", post(ingest::ingest_cost))
        .route("/api/ingest/metrics", post(ingest::ingest_metrics))
        .route("/api/ingest/violation", post(ingest::ingest_violation))
        .route("/api/decisions/:decision_id/resolve", post(decisions::resolve))
        .route("/ops/api/decisions/reconcile", post(ops::reconcile))
        .route("/ops/api/policies", post(ops::upsert_policy))
        .route("/ops/api/me", get(ops::me))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
