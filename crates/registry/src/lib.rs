//! Adapter Registry (spec.md §4.2): persistent table of registered adapters,
//! their declared capabilities, and risk class.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use clasper_core::identity::TenantId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declared risk class of an adapter, used by policy conditions and
/// default-deny heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Read-only or informational adapters.
    Low,
    /// Adapters with bounded, reversible side effects.
    Medium,
    /// Adapters that can cause meaningful, possibly irreversible, side effects.
    High,
    /// Adapters capable of broad or destructive side effects.
    Critical,
}

/// A registered adapter instance/version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adapter {
    /// Adapter identifier, stable across versions.
    pub adapter_id: String,
    /// Adapter-reported version string.
    pub version: String,
    /// Human-friendly name shown in operator tooling.
    pub display_name: String,
    /// Declared risk class.
    pub risk_class: RiskClass,
    /// Ordered list of declared capabilities (tool names or capability tags).
    pub capabilities: Vec<String>,
    /// Whether this adapter is currently permitted to request decisions.
    pub enabled: bool,
    /// First-seen timestamp (ms since epoch).
    pub created_at: u64,
    /// Last-updated timestamp (ms since epoch).
    pub updated_at: u64,
}

/// Registration payload supplied by an adapter on `POST /adapters/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterRegistration {
    /// Adapter identifier.
    pub adapter_id: String,
    /// Adapter-reported version string.
    pub version: String,
    /// Human-friendly display name.
    pub display_name: String,
    /// Declared risk class.
    pub risk_class: RiskClass,
    /// Declared capabilities.
    pub capabilities: Vec<String>,
}

/// Pagination parameters for `list`.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Maximum rows to return.
    pub limit: usize,
    /// Rows to skip before collecting `limit`.
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct AdapterKey {
    tenant: TenantId,
    adapter_id: String,
    version: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct LatestKey {
    tenant: TenantId,
    adapter_id: String,
}

/// In-memory adapter registry, upserted by `(tenant, adapter_id, version)`.
///
/// Mirrors the teacher's two-index `RunIndex` shape: one map for exact-key
/// lookups, one tracking which version is "most recently updated" for
/// version-less `get` calls.
#[derive(Clone, Default)]
pub struct Registry {
    by_version: Arc<DashMap<AdapterKey, Adapter>>,
    latest_version: Arc<DashMap<LatestKey, String>>,
}

impl Registry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an adapter by `(tenant, adapter_id, version)`. Re-registration
    /// is idempotent: calling this again with the same triple updates the
    /// declared fields and bumps `updated_at`, never deletes.
    pub fn register(&self, tenant: &TenantId, registration: AdapterRegistration) -> Adapter {
        let key = AdapterKey {
            tenant: tenant.clone(),
            adapter_id: registration.adapter_id.clone(),
            version: registration.version.clone(),
        };
        let now = clasper_core::ids::now_ms();
        let created_at = self.by_version.get(&key).map_or(now, |a| a.created_at);
        let adapter = Adapter {
            adapter_id: registration.adapter_id.clone(),
            version: registration.version.clone(),
            display_name: registration.display_name,
            risk_class: registration.risk_class,
            capabilities: registration.capabilities,
            enabled: true,
            created_at,
            updated_at: now,
        };
        self.by_version.insert(key, adapter.clone());
        self.latest_version.insert(
            LatestKey { tenant: tenant.clone(), adapter_id: registration.adapter_id },
            registration.version,
        );
        adapter
    }

    /// Fetch a specific version, or the most-recently-updated version when
    /// `version` is `None`.
    #[must_use]
    pub fn get(&self, tenant: &TenantId, adapter_id: &str, version: Option<&str>) -> Option<Adapter> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self
                .latest_version
                .get(&LatestKey { tenant: tenant.clone(), adapter_id: adapter_id.to_string() })?
                .clone(),
        };
        self.by_version
            .get(&AdapterKey { tenant: tenant.clone(), adapter_id: adapter_id.to_string(), version })
            .map(|r| r.clone())
    }

    /// List adapters for a tenant, across all versions, ordered by
    /// `adapter_id` then `version` for deterministic pagination.
    #[must_use]
    pub fn list(&self, tenant: &TenantId, page: Page) -> Vec<Adapter> {
        let mut rows: Vec<Adapter> = self
            .by_version
            .iter()
            .filter(|e| &e.key().tenant == tenant)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id).then(a.version.cmp(&b.version)));
        rows.into_iter().skip(page.offset).take(page.limit).collect()
    }

    /// Disable an adapter (never deleted per spec.md §3 lifecycle).
    pub fn set_enabled(&self, tenant: &TenantId, adapter_id: &str, version: &str, enabled: bool) {
        if let Some(mut a) = self.by_version.get_mut(&AdapterKey {
            tenant: tenant.clone(),
            adapter_id: adapter_id.to_string(),
            version: version.to_string(),
        }) {
            a.enabled = enabled;
            a.updated_at = clasper_core::ids::now_ms();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(adapter_id: &str, version: &str, caps: &[&str]) -> AdapterRegistration {
        AdapterRegistration {
            adapter_id: adapter_id.into(),
            version: version.into(),
            display_name: "Test Adapter".into(),
            risk_class: RiskClass::High,
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn register_then_get_latest() {
        let r = Registry::new();
        let t = TenantId::from("t1");
        r.register(&t, reg("openclaw-local", "1.0.0", &["delete"]));
        r.register(&t, reg("openclaw-local", "1.1.0", &["delete", "exec"]));
        let latest = r.get(&t, "openclaw-local", None).unwrap();
        assert_eq!(latest.version, "1.1.0");
        assert_eq!(latest.capabilities, vec!["delete", "exec"]);
    }

    #[test]
    fn get_specific_version_still_reachable() {
        let r = Registry::new();
        let t = TenantId::from("t1");
        r.register(&t, reg("a", "1.0.0", &["x"]));
        r.register(&t, reg("a", "2.0.0", &["x", "y"]));
        let v1 = r.get(&t, "a", Some("1.0.0")).unwrap();
        assert_eq!(v1.capabilities, vec!["x"]);
    }

    #[test]
    fn reregistration_preserves_created_at() {
        let r = Registry::new();
        let t = TenantId::from("t1");
        let first = r.register(&t, reg("a", "1.0.0", &["x"]));
        let second = r.register(&t, reg("a", "1.0.0", &["x", "y"]));
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.capabilities, vec!["x", "y"]);
    }

    #[test]
    fn list_is_tenant_scoped_and_sorted() {
        let r = Registry::new();
        let t1 = TenantId::from("t1");
        let t2 = TenantId::from("t2");
        r.register(&t1, reg("b", "1.0.0", &[]));
        r.register(&t1, reg("a", "1.0.0", &[]));
        r.register(&t2, reg("z", "1.0.0", &[]));
        let rows = r.list(&t1, Page::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].adapter_id, "a");
        assert_eq!(rows[1].adapter_id, "b");
    }
}
