//! The Policy Store (spec §4.3): a tenant/workspace-queryable, upsert-by-id
//! table of [`Policy`] rows, loadable from YAML.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Policy, PolicyFile};

/// Errors raised while loading or querying the policy store.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The YAML document could not be parsed.
    #[error("malformed policy file: {0}")]
    Malformed(String),
    /// The file could not be opened.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory policy store, upserted by `policy_id`.
///
/// Mirrors the teacher's `DashMap`-backed registries: cheap to clone, safe
/// to share across axum handlers behind `Arc` or by value.
#[derive(Clone, Default)]
pub struct PolicyStore {
    inner: Arc<DashMap<String, Policy>>,
}

impl PolicyStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy by its `policy_id`.
    pub fn upsert(&self, policy: Policy) {
        self.inner.insert(policy.policy_id.clone(), policy);
    }

    /// Fetch one policy by id.
    #[must_use]
    pub fn get(&self, policy_id: &str) -> Option<Policy> {
        self.inner.get(policy_id).map(|r| r.clone())
    }

    /// Disable a policy in place (policies are never deleted, spec §3).
    pub fn disable(&self, policy_id: &str) -> bool {
        if let Some(mut p) = self.inner.get_mut(policy_id) {
            p.enabled = false;
            true
        } else {
            false
        }
    }

    /// All policies scoped to `tenant`, optionally narrowed to a workspace.
    /// A tenant-wide policy (`scope.workspace == None`) applies to every
    /// workspace under that tenant.
    #[must_use]
    pub fn list_for(&self, tenant: &str, workspace: Option<&str>) -> Vec<Policy> {
        self.inner
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.scope.tenant == tenant
                    && p.scope
                        .workspace
                        .as_deref()
                        .map_or(true, |ws| Some(ws) == workspace)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All policies for a tenant regardless of enabled/disabled state, for
    /// operator listing views.
    #[must_use]
    pub fn list_all(&self, tenant: &str) -> Vec<Policy> {
        self.inner
            .iter()
            .filter(|entry| entry.value().scope.tenant == tenant)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Load and upsert every policy in a YAML document.
    pub fn load_yaml_str(&self, yaml: &str) -> Result<usize, PolicyError> {
        let file: PolicyFile = serde_yaml::from_str(yaml).map_err(|e| PolicyError::Malformed(e.to_string()))?;
        let n = file.policies.len();
        for policy in file.policies {
            self.upsert(policy);
        }
        Ok(n)
    }

    /// Load and upsert every policy in a YAML file on disk.
    pub fn load_yaml_path(&self, path: impl AsRef<Path>) -> Result<usize, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        self.load_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
policies:
  - policy_id: openclaw-deny-delete-file
    scope: { tenant: t1 }
    subject: { type: tool, name: delete }
    effect: { decision: deny }
    precedence: 30
    explanation: deletes are never auto-allowed
  - policy_id: openclaw-allow-safe-shell-reads-local
    scope: { tenant: t1, workspace: w1 }
    subject: { type: tool, name: exec }
    conditions:
      context.exec.argv0: { in: [ls, pwd, whoami] }
      context.targets.paths: { all_under: ["{{workspace.root}}"] }
    effect: { decision: allow }
    precedence: 40
"#;

    #[test]
    fn loads_and_scopes_policies() {
        let store = PolicyStore::new();
        let n = store.load_yaml_str(SAMPLE).unwrap();
        assert_eq!(n, 2);

        let tenant_wide = store.list_for("t1", Some("w2"));
        assert_eq!(tenant_wide.len(), 1);
        assert_eq!(tenant_wide[0].policy_id, "openclaw-deny-delete-file");

        let workspace_scoped = store.list_for("t1", Some("w1"));
        assert_eq!(workspace_scoped.len(), 2);

        assert!(store.list_for("other-tenant", None).is_empty());
    }

    #[test]
    fn disable_is_visible_but_not_removed() {
        let store = PolicyStore::new();
        store.load_yaml_str(SAMPLE).unwrap();
        assert!(store.disable("openclaw-deny-delete-file"));
        let p = store.get("openclaw-deny-delete-file").unwrap();
        assert!(!p.enabled);
        assert_eq!(store.list_all("t1").len(), 2);
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let store = PolicyStore::new();
        let err = store.load_yaml_str("not: [valid").unwrap_err();
        assert!(matches!(err, PolicyError::Malformed(_)));
    }
}
