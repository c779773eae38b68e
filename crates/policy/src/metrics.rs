//! In-process decision observability: a pluggable observer plus low-
//! cardinality counters, carried over from the teacher's `PolicyObserver`
//! pattern and renamed to the spec's `policy.decision.count{tenant,effect}`
//! vocabulary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::engine::EvaluationOutcome;

/// Observer invoked for every decision the engine produces.
///
/// Install via [`set_observer`]. Implementations must be cheap and
/// non-blocking; this runs on the decision hot path.
pub trait PolicyObserver: Send + Sync {
    /// Called once per evaluated request with the owning tenant id.
    fn on_decision(&self, tenant: &str, outcome: &EvaluationOutcome);
}

static OBSERVER: OnceLock<RwLock<Option<Arc<dyn PolicyObserver>>>> = OnceLock::new();

/// Install or clear the global policy observer.
pub fn set_observer(observer: Option<Box<dyn PolicyObserver>>) {
    let cell = OBSERVER.get_or_init(|| RwLock::new(None));
    let mut w = cell.write().expect("observer write lock poisoned");
    *w = observer.map(Arc::from);
}

/// In-process counters for policy decisions keyed by `{tenant, effect}`.
///
/// Low-cardinality by construction; not persisted across restarts. Intended
/// for tests and local observability — production metrics go through
/// `clasper-telemetry`'s OTel instruments.
#[derive(Default)]
pub struct PolicyMetrics {
    inner: Arc<Mutex<HashMap<(String, &'static str), u64>>>,
}

impl PolicyMetrics {
    /// Current count for a `{tenant, effect}` pair.
    #[must_use]
    pub fn decision_count(&self, tenant: &str, effect: &str) -> u64 {
        self.inner
            .lock()
            .expect("metrics lock poisoned")
            .get(&(tenant.to_string(), normalize_effect(effect)))
            .copied()
            .unwrap_or(0)
    }

    fn inc(&self, tenant: &str, effect: &'static str) {
        let mut g = self.inner.lock().expect("metrics lock poisoned");
        *g.entry((tenant.to_string(), effect)).or_insert(0) += 1;
    }
}

fn normalize_effect(effect: &str) -> &'static str {
    match effect {
        "allow" => "allow",
        "deny" => "deny",
        "require_approval" => "require_approval",
        _ => "unknown",
    }
}

static METRICS: OnceLock<PolicyMetrics> = OnceLock::new();

/// Access the global policy metrics registry.
pub fn policy_metrics() -> &'static PolicyMetrics {
    METRICS.get_or_init(PolicyMetrics::default)
}

/// Record a decision against the global metrics registry and notify the
/// installed observer, if any. Called by `clasper-ledger` once per
/// `createDecision`.
pub fn record_decision(tenant: &str, outcome: &EvaluationOutcome) {
    let metrics = METRICS.get_or_init(PolicyMetrics::default);
    metrics.inc(tenant, outcome.effect.as_str());
    if let Some(lock) = OBSERVER.get() {
        if let Ok(r) = lock.read() {
            if let Some(obs) = r.as_ref() {
                obs.on_decision(tenant, outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::TemplateContext;
    use crate::engine::{evaluate, ApprovalMode};
    use crate::model::*;

    #[test]
    fn decisions_are_counted_per_tenant_and_effect() {
        let request = ExecutionRequest {
            execution_id: "e1".into(),
            adapter_id: "a".into(),
            tenant_id: "t-metrics".into(),
            workspace_id: None,
            requested_capabilities: vec![],
            tool: Some("read".into()),
            tool_group: None,
            skill: None,
            intent: None,
            context: ExecutionContext::default(),
            provenance: None,
        };
        let outcome = evaluate(&request, &[], &[], ApprovalMode::Enforce, &TemplateContext::default());
        let before = policy_metrics().decision_count("t-metrics", "allow");
        record_decision("t-metrics", &outcome);
        assert_eq!(policy_metrics().decision_count("t-metrics", "allow"), before + 1);
    }
}
