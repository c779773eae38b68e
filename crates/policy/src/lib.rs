//! Clasper Policy Store and Decision Engine (spec §4.3).
//!
//! A declarative, ordered rule set evaluated as a pure function over one
//! [`model::ExecutionRequest`]. The engine never writes anything; persisting
//! the resulting [`engine::EvaluationOutcome`] into a stateful `Decision` row
//! with an id, status, and audit trail is `clasper-ledger`'s job.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conditions;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod store;

pub use conditions::{ConditionSpec, TemplateContext};
pub use engine::{evaluate, ApprovalMode, DecisionTraceEntry, EvaluationOutcome, GrantedScope, TraceResult};
pub use metrics::{policy_metrics, record_decision, set_observer, PolicyMetrics, PolicyObserver};
pub use model::{
    EffectDecision, Effect, ExecFields, ExecutionContext, ExecutionRequest, GrantedScopeSpec, Policy, PolicyFile,
    PolicyScope, Provenance, SideEffects, Subject, SubjectType, Targets,
};
pub use store::{PolicyError, PolicyStore};

/// Build the conventional catch-all policy deployments are expected to
/// install to close the default-allow gap (spec §4.3, §9 Open Questions):
/// every request that no other rule matches falls through to
/// `require_approval` instead of silently allowing.
#[must_use]
pub fn fallback_require_approval_policy(tenant: &str, workspace: Option<&str>) -> Policy {
    Policy {
        policy_id: "openclaw-fallback-require-approval".to_string(),
        scope: PolicyScope { tenant: tenant.to_string(), workspace: workspace.map(str::to_string) },
        subject: Subject { subject_type: SubjectType::Adapter, name: None },
        conditions: Default::default(),
        effect: Effect { decision: EffectDecision::RequireApproval, required_role: None, granted_scope: None },
        precedence: i64::MIN,
        enabled: true,
        explanation: Some("no installed policy matched this request; holding for operator review".to_string()),
        is_fallback: true,
    }
}
