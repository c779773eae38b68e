//! Telemetry Ingest (spec.md §4.7, §8 P2/I6): five idempotent sinks
//! (`trace`, `audit`, `cost`, `metrics`, `violation`), each deduplicated on
//! `(execution_id, event_kind)`.

use std::sync::Arc;

use clasper_audit::{AuditChain, Linkage};
use clasper_budget::{BudgetState, TenantBudgets};
use clasper_core::identity::TenantId;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Common header fields every ingest envelope carries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvelopeHeader {
    /// Owning tenant.
    pub tenant_id: String,
    /// Workspace scope, if pinned.
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// The execution this envelope concerns.
    pub execution_id: String,
    /// The trace this envelope concerns, if applicable.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// The adapter that produced this envelope.
    pub adapter_id: String,
    /// When the underlying event occurred, ms since epoch.
    #[serde(default)]
    pub occurred_at: Option<u64>,
    /// When the control plane received this envelope, ms since epoch.
    #[serde(default)]
    pub recorded_at: Option<u64>,
}

/// One step of a trace's post-execution narrative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceStep {
    /// Free-form step name (e.g. `"tool_call"`, `"llm_turn"`).
    pub name: String,
    /// Step payload, included in the integrity hash chain.
    #[serde(default)]
    pub data: Value,
}

/// Integrity verdict for a trace's step-hash chain (spec §3 `Trace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// The declared root matched the recomputed step-hash chain.
    Verified,
    /// No integrity root was declared; self-attested, unsigned.
    Unsigned,
    /// A root was declared but there were no steps to verify it against.
    Unverified,
    /// A root was declared and did not match the recomputed chain.
    Compromised,
}

/// Derived trust verdict (I7: never stored independently of
/// `integrity_status`/`violations`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    /// Integrity verified and no violations reported.
    Verified,
    /// Integrity verified but violations were reported.
    VerifiedWithViolations,
    /// Integrity could not be established either way.
    Unverified,
    /// Integrity verification failed outright.
    Compromised,
}

fn derive_trust_status(integrity: IntegrityStatus, has_violations: bool) -> TrustStatus {
    match integrity {
        IntegrityStatus::Compromised => TrustStatus::Compromised,
        IntegrityStatus::Verified if has_violations => TrustStatus::VerifiedWithViolations,
        IntegrityStatus::Verified => TrustStatus::Verified,
        IntegrityStatus::Unsigned | IntegrityStatus::Unverified => TrustStatus::Unverified,
    }
}

fn chain_steps(steps: &[TraceStep]) -> String {
    let mut acc = "0".repeat(64);
    for step in steps {
        let mut hasher = Sha256::new();
        hasher.update(acc.as_bytes());
        hasher.update(clasper_core::stable_json::stringify(&serde_json::to_value(step).unwrap_or(Value::Null)).as_bytes());
        acc = hex::encode(hasher.finalize());
    }
    acc
}

/// Envelope for `POST /api/ingest/trace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEnvelope {
    /// Common header.
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// The narrative steps.
    #[serde(default)]
    pub steps: Vec<TraceStep>,
    /// The scope that was granted to this execution.
    #[serde(default)]
    pub granted_scope: Value,
    /// The scope the adapter reports having actually used.
    #[serde(default)]
    pub used_scope: Value,
    /// Violations observed during execution.
    #[serde(default)]
    pub violations: Vec<Value>,
    /// The integrity root the adapter claims the steps hash to, if any.
    #[serde(default)]
    pub integrity_root: Option<String>,
}

/// A persisted trace (spec §3 `Trace`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Trace identifier.
    pub trace_id: String,
    /// The execution this trace narrates.
    pub execution_id: String,
    /// The adapter that produced it.
    pub adapter_id: String,
    /// The narrative steps.
    pub steps: Vec<TraceStep>,
    /// The scope that was granted.
    pub granted_scope: Value,
    /// The scope actually used.
    pub used_scope: Value,
    /// Violations observed.
    pub violations: Vec<Value>,
    /// Integrity verdict.
    pub integrity_status: IntegrityStatus,
    /// Derived trust verdict.
    pub trust_status: TrustStatus,
}

/// Envelope for `POST /api/ingest/audit`: an adapter- or shim-observed
/// governance event to fold into the central audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEnvelope {
    /// Common header.
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// The audit event type.
    pub event_type: String,
    /// The audit event payload.
    #[serde(default)]
    pub event_data: Value,
}

/// Envelope for `POST /api/ingest/cost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEnvelope {
    /// Common header.
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// Tokens consumed.
    #[serde(default)]
    pub tokens: u64,
    /// Cost in micros of the billing currency.
    #[serde(default)]
    pub cost_micros: u64,
}

/// Envelope for `POST /api/ingest/metrics`: a free-form metrics bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    /// Common header.
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// Metric name/value pairs.
    #[serde(default)]
    pub metrics: Value,
}

/// Envelope for `POST /api/ingest/violation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEnvelope {
    /// Common header.
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// The violation's type, e.g. `"scope_exceeded"`.
    pub violation_type: String,
    /// Violation detail.
    #[serde(default)]
    pub detail: Value,
}

/// Result of an ingest call (spec §6 `{status: "ok"|"duplicate"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First write for this `(execution_id, event_kind)`.
    Ok,
    /// A repeat of an already-ingested `(execution_id, event_kind)`.
    Duplicate,
}

/// Idempotent sinks for the five telemetry envelope kinds (spec §4.7, I6).
///
/// Dedup is an atomic insert into a `(execution_id, event_kind)` set,
/// mirroring spec §5's uniqueness-constraint requirement; the in-memory
/// `DashSet` plays that role here.
#[derive(Clone, Default)]
pub struct IngestStore {
    dedup: Arc<DashSet<(String, String)>>,
    traces: Arc<DashMap<String, Trace>>,
    costs: Arc<DashMap<(String, String), CostEnvelope>>,
    metrics: Arc<DashMap<(String, String), MetricsEnvelope>>,
    violations: Arc<DashMap<(String, String), ViolationEnvelope>>,
}

impl IngestStore {
    /// Construct an empty ingest store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self, execution_id: &str, event_kind: &str) -> bool {
        self.dedup.insert((execution_id.to_string(), event_kind.to_string()))
    }

    /// Ingest a trace envelope: verify inline integrity, derive
    /// `trust_status`, persist, and write one `adapter_trace_ingested`
    /// audit entry on the non-duplicate path.
    pub fn ingest_trace(&self, audit: &AuditChain, envelope: TraceEnvelope) -> IngestOutcome {
        if !self.try_claim(&envelope.header.execution_id, "trace") {
            return IngestOutcome::Duplicate;
        }

        let integrity_status = match &envelope.integrity_root {
            None => IntegrityStatus::Unsigned,
            Some(_) if envelope.steps.is_empty() => IntegrityStatus::Unverified,
            Some(root) => {
                if &chain_steps(&envelope.steps) == root {
                    IntegrityStatus::Verified
                } else {
                    IntegrityStatus::Compromised
                }
            }
        };
        let trust_status = derive_trust_status(integrity_status, !envelope.violations.is_empty());

        let trace = Trace {
            trace_id: envelope.header.trace_id.clone().unwrap_or_else(|| clasper_core::ids::new_trace_id()),
            execution_id: envelope.header.execution_id.clone(),
            adapter_id: envelope.header.adapter_id.clone(),
            steps: envelope.steps,
            granted_scope: envelope.granted_scope,
            used_scope: envelope.used_scope,
            violations: envelope.violations,
            integrity_status,
            trust_status,
        };
        self.traces.insert(trace.trace_id.clone(), trace.clone());

        let _ = audit.append(
            &TenantId::from(envelope.header.tenant_id.as_str()),
            "adapter_trace_ingested",
            serde_json::to_value(&trace).unwrap_or(Value::Null),
            Linkage {
                execution_id: Some(trace.execution_id.clone()),
                trace_id: Some(trace.trace_id.clone()),
                workspace_id: envelope.header.workspace_id,
            },
        );
        IngestOutcome::Ok
    }

    /// Fetch a previously-ingested trace by id.
    #[must_use]
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.get(trace_id).map(|r| r.clone())
    }

    /// Ingest an audit envelope: fold an adapter/shim-observed event into
    /// the shared audit chain. Dedup key is suffixed with `event_type`
    /// (spec §4.7).
    pub fn ingest_audit(&self, audit: &AuditChain, envelope: AuditEnvelope) -> IngestOutcome {
        let kind = format!("audit:{}", envelope.event_type);
        if !self.try_claim(&envelope.header.execution_id, &kind) {
            return IngestOutcome::Duplicate;
        }
        let _ = audit.append(
            &TenantId::from(envelope.header.tenant_id.as_str()),
            &envelope.event_type,
            envelope.event_data,
            Linkage {
                execution_id: Some(envelope.header.execution_id),
                trace_id: envelope.header.trace_id,
                workspace_id: envelope.header.workspace_id,
            },
        );
        IngestOutcome::Ok
    }

    /// Ingest a cost envelope: update the tenant's budget counter and
    /// persist the raw record. Budget overruns are recorded as audit
    /// events but never block ingest.
    pub fn ingest_cost(&self, audit: &AuditChain, budgets: &TenantBudgets, envelope: CostEnvelope) -> IngestOutcome {
        if !self.try_claim(&envelope.header.execution_id, "cost") {
            return IngestOutcome::Duplicate;
        }
        let tenant = TenantId::from(envelope.header.tenant_id.as_str());
        let state = budgets.add_usage(&tenant, envelope.tokens, envelope.cost_micros);
        self.costs.insert((envelope.header.execution_id.clone(), "cost".to_string()), envelope.clone());

        if matches!(state, BudgetState::Exceeded) {
            let _ = audit.append(
                &tenant,
                "budget_exceeded",
                serde_json::json!({
                    "execution_id": envelope.header.execution_id,
                    "tokens": envelope.tokens,
                    "cost_micros": envelope.cost_micros,
                }),
                Linkage {
                    execution_id: Some(envelope.header.execution_id.clone()),
                    trace_id: envelope.header.trace_id.clone(),
                    workspace_id: envelope.header.workspace_id.clone(),
                },
            );
        }
        IngestOutcome::Ok
    }

    /// Ingest a metrics envelope: persist the raw bag, no audit entry.
    pub fn ingest_metrics(&self, envelope: MetricsEnvelope) -> IngestOutcome {
        if !self.try_claim(&envelope.header.execution_id, "metrics") {
            return IngestOutcome::Duplicate;
        }
        self.metrics.insert((envelope.header.execution_id.clone(), "metrics".to_string()), envelope);
        IngestOutcome::Ok
    }

    /// Ingest a violation envelope. Dedup key is suffixed with
    /// `violation_type` (spec §4.7).
    pub fn ingest_violation(&self, audit: &AuditChain, envelope: ViolationEnvelope) -> IngestOutcome {
        let kind = format!("violation:{}", envelope.violation_type);
        if !self.try_claim(&envelope.header.execution_id, &kind) {
            return IngestOutcome::Duplicate;
        }
        let tenant = TenantId::from(envelope.header.tenant_id.as_str());
        self.violations.insert((envelope.header.execution_id.clone(), kind), envelope.clone());
        let _ = audit.append(
            &tenant,
            "execution_violation_reported",
            serde_json::json!({"violation_type": envelope.violation_type, "detail": envelope.detail}),
            Linkage {
                execution_id: Some(envelope.header.execution_id),
                trace_id: envelope.header.trace_id,
                workspace_id: envelope.header.workspace_id,
            },
        );
        IngestOutcome::Ok
    }
}
