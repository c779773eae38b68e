//! Cost/token budget counters.
//!
//! A `Manager` tracks usage against an optional token/cost ceiling for one
//! scope (a tenant, in this crate's main use; the teacher used one per
//! orchestration run). `TenantBudgets` is the per-tenant registry the
//! control plane keeps one of, consulted by Telemetry Ingest's cost sink and
//! by the Decision Engine's `granted_scope` defaults.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use clasper_core::identity::TenantId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default `max_steps` attached to a `granted_scope` when no policy overrides it.
pub const DEFAULT_MAX_STEPS: u64 = 50;
/// Default `max_cost` (micros) attached to a `granted_scope` when no policy overrides it.
pub const DEFAULT_MAX_COST_MICROS: u64 = 1_000_000;
/// Default `granted_scope` lifetime: decision-time + 1 hour.
pub const DEFAULT_GRANT_TTL_MS: u64 = 60 * 60 * 1000;

/// Optional ceilings for a budget scope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    /// Maximum total tokens, if bounded.
    pub max_tokens: Option<u64>,
    /// Maximum total cost in micros of the billing currency, if bounded.
    pub max_cost_micros: Option<u64>,
}

/// Coarse threshold state derived from current usage vs. configured ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    /// Usage is comfortably within all configured ceilings.
    Within,
    /// Usage has crossed 80% of the tightest ceiling.
    Warning80,
    /// Usage has crossed 90% of the tightest ceiling.
    Warning90,
    /// Usage has exceeded a configured ceiling.
    Exceeded,
}

/// Atomic usage counters, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    tokens: Arc<AtomicU64>,
    cost_micros: Arc<AtomicU64>,
}

impl Counters {
    fn add_tokens(&self, n: u64) {
        self.tokens.fetch_add(n, Ordering::Relaxed);
    }
    fn add_cost_micros(&self, n: u64) {
        self.cost_micros.fetch_add(n, Ordering::Relaxed);
    }
    /// Current `(tokens, cost_micros)` totals.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (self.tokens.load(Ordering::Relaxed), self.cost_micros.load(Ordering::Relaxed))
    }
}

/// Tracks usage for one budget scope against its configured ceilings.
#[derive(Debug, Clone)]
pub struct Manager {
    cfg: BudgetConfig,
    counters: Counters,
}

impl Manager {
    /// Construct a manager with the given ceilings.
    #[must_use]
    pub fn new(cfg: BudgetConfig) -> Self {
        Self { cfg, counters: Counters::default() }
    }

    /// Current usage counters, shareable independently of the manager.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters.clone()
    }

    /// `true` when all configured ceilings are still respected.
    #[must_use]
    pub fn within_limits(&self) -> bool {
        let (t, c) = self.counters.snapshot();
        self.cfg.max_tokens.map_or(true, |m| t <= m) && self.cfg.max_cost_micros.map_or(true, |m| c <= m)
    }

    /// Record additional usage.
    pub fn add_usage(&self, tokens: u64, cost_micros: u64) {
        if tokens > 0 {
            self.counters.add_tokens(tokens);
        }
        if cost_micros > 0 {
            self.counters.add_cost_micros(cost_micros);
        }
    }

    /// Current threshold state across both token and cost ceilings.
    #[must_use]
    pub fn status(&self) -> BudgetState {
        let (t, c) = self.counters.snapshot();
        let token_ratio = self.cfg.max_tokens.map_or(0.0, |m| if m > 0 { t as f64 / m as f64 } else { 0.0 });
        let cost_ratio = self
            .cfg
            .max_cost_micros
            .map_or(0.0, |m| if m > 0 { c as f64 / m as f64 } else { 0.0 });
        let r = token_ratio.max(cost_ratio);
        if r > 1.0 {
            BudgetState::Exceeded
        } else if r >= 0.90 {
            BudgetState::Warning90
        } else if r >= 0.80 {
            BudgetState::Warning80
        } else {
            BudgetState::Within
        }
    }
}

/// Per-tenant registry of budget managers, created lazily on first use with
/// an unbounded default config (tenants opt into ceilings via policy/ops
/// configuration, not by the mere act of sending telemetry).
#[derive(Clone, Default)]
pub struct TenantBudgets {
    inner: Arc<DashMap<TenantId, Manager>>,
}

impl TenantBudgets {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure (or reconfigure) the ceiling for a tenant. Existing usage
    /// counters are preserved.
    pub fn configure(&self, tenant: &TenantId, cfg: BudgetConfig) {
        let counters = self.inner.get(tenant).map(|existing| existing.counters());
        let mgr = match counters {
            Some(counters) => Manager { cfg, counters },
            None => Manager::new(cfg),
        };
        self.inner.insert(tenant.clone(), mgr);
    }

    /// Record usage against a tenant's budget, creating an unbounded default
    /// manager if none was configured yet.
    pub fn add_usage(&self, tenant: &TenantId, tokens: u64, cost_micros: u64) -> BudgetState {
        let mgr = self.inner.entry(tenant.clone()).or_insert_with(|| Manager::new(BudgetConfig::default()));
        mgr.add_usage(tokens, cost_micros);
        mgr.status()
    }

    /// Current usage snapshot for a tenant, `(0, 0)` if never recorded.
    #[must_use]
    pub fn snapshot(&self, tenant: &TenantId) -> (u64, u64) {
        self.inner.get(tenant).map_or((0, 0), |m| m.counters().snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limits_when_unbounded() {
        let m = Manager::new(BudgetConfig::default());
        m.add_usage(1_000_000, 1_000_000);
        assert!(m.within_limits());
        assert_eq!(m.status(), BudgetState::Within);
    }

    #[test]
    fn crosses_warning_and_exceeded_thresholds() {
        let m = Manager::new(BudgetConfig { max_tokens: Some(100), max_cost_micros: None });
        m.add_usage(85, 0);
        assert_eq!(m.status(), BudgetState::Warning80);
        m.add_usage(6, 0);
        assert_eq!(m.status(), BudgetState::Warning90);
        m.add_usage(20, 0);
        assert_eq!(m.status(), BudgetState::Exceeded);
        assert!(!m.within_limits());
    }

    #[test]
    fn tenant_budgets_are_isolated() {
        let tb = TenantBudgets::new();
        let t1 = TenantId::from("t1");
        let t2 = TenantId::from("t2");
        tb.configure(&t1, BudgetConfig { max_tokens: Some(10), max_cost_micros: None });
        assert_eq!(tb.add_usage(&t1, 11, 0), BudgetState::Exceeded);
        assert_eq!(tb.snapshot(&t2), (0, 0));
    }
}
