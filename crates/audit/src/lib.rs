//! Audit Chain (spec.md §4.5, §8 P3): an append-only, hash-linked, per-tenant
//! event log.
//!
//! Generalizes the teacher's `JsonlEventLog` from a flat monotonic-id WAL
//! into a per-tenant hash chain: each entry's `event_hash` commits to the
//! tenant, its own sequence number, the previous entry's hash, the event
//! type, and a canonical ("stable JSON") encoding of the event payload.
//! `verify` replays a tenant's file and reports the first broken link, if
//! any — a gap or hash mismatch makes the chain `compromised` (spec
//! GLOSSARY).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clasper_core::identity::TenantId;
use clasper_core::stable_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while appending to or reading the audit chain.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing file could not be read or written.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted line could not be parsed back into an [`AuditEntry`].
    #[error("malformed audit line: {0}")]
    Malformed(String),
}

/// Linkage back to the originating decision/trace, carried by most entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Linkage {
    /// The execution this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// The trace this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// The workspace this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

/// One chain-linked governance event (spec §3 `AuditEntry`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Owning tenant.
    pub tenant_id: String,
    /// Monotone, gap-free sequence number within `tenant_id`. Starts at 1.
    pub seq: u64,
    /// Event type, e.g. `"tool_execution_blocked"`.
    pub event_type: String,
    /// Event payload, hashed via `stable_json::stringify`.
    pub event_data: Value,
    /// `event_hash` of the previous entry for this tenant; all-zero hash
    /// (64 `0` chars) for `seq == 1`.
    pub prev_event_hash: String,
    /// `sha256(tenant || seq || prev_event_hash || event_type || stable_json(event_data))`.
    pub event_hash: String,
    /// Millis since epoch.
    pub created_at: u64,
    /// Optional linkage to execution/trace/workspace.
    #[serde(default)]
    pub linkage: Linkage,
}

/// The all-zero hash (64 `0` hex chars) used as `prev_event_hash` for the
/// first entry of a tenant's chain.
fn genesis_hash_64() -> String {
    "0".repeat(64)
}

fn compute_hash(tenant: &str, seq: u64, prev_hash: &str, event_type: &str, data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.as_bytes());
    hasher.update(seq.to_string().as_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(stable_json::stringify(data).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct TenantChain {
    last_seq: u64,
    last_hash: String,
}

/// The append-only, hash-linked audit log, one JSONL file per tenant under
/// `base_dir`.
///
/// Per-tenant appends are serialized under a single [`Mutex`] guarding the
/// in-memory `(last_seq, last_hash)` cursor, matching spec §5's "audit
/// writer serializes append operations under a per-tenant lock" ordering
/// requirement and the teacher's `JsonlEventLog` single-writer shape.
#[derive(Clone)]
pub struct AuditChain {
    base_dir: PathBuf,
    cursors: Arc<Mutex<HashMap<String, TenantChain>>>,
}

impl AuditChain {
    /// Open (creating if needed) an audit chain rooted at `base_dir`, one
    /// file per tenant named `<tenant_id>.jsonl`. Existing files are
    /// scanned once to recover each tenant's `(last_seq, last_hash)` cursor.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let chain = Self { base_dir, cursors: Arc::new(Mutex::new(HashMap::new())) };
        for entry in std::fs::read_dir(&chain.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(tenant) = path.file_stem().and_then(|s| s.to_str()) {
                chain.recover_cursor(tenant)?;
            }
        }
        Ok(chain)
    }

    fn tenant_path(&self, tenant: &str) -> PathBuf {
        self.base_dir.join(format!("{tenant}.jsonl"))
    }

    fn recover_cursor(&self, tenant: &str) -> Result<(), AuditError> {
        let path = self.tenant_path(tenant);
        if !path.exists() {
            return Ok(());
        }
        let file = File::open(&path)?;
        let mut last_seq = 0u64;
        let mut last_hash = genesis_hash_64();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry: AuditEntry =
                serde_json::from_str(&line).map_err(|e| AuditError::Malformed(e.to_string()))?;
            last_seq = entry.seq;
            last_hash = entry.event_hash;
        }
        let mut cursors = self.cursors.lock().expect("audit cursor lock poisoned");
        cursors.insert(tenant.to_string(), TenantChain { last_seq, last_hash });
        Ok(())
    }

    /// Append one event for `tenant`, returning the persisted [`AuditEntry`]
    /// (I5: every mutating operation appends at least one audit entry).
    pub fn append(
        &self,
        tenant: &TenantId,
        event_type: &str,
        event_data: Value,
        linkage: Linkage,
    ) -> Result<AuditEntry, AuditError> {
        let tenant_key = tenant.0.clone();
        let mut cursors = self.cursors.lock().expect("audit cursor lock poisoned");
        let cursor = cursors.entry(tenant_key.clone()).or_default();
        let seq = cursor.last_seq + 1;
        let prev_hash = if cursor.last_seq == 0 { genesis_hash_64() } else { cursor.last_hash.clone() };
        let event_hash = compute_hash(&tenant_key, seq, &prev_hash, event_type, &event_data);

        let entry = AuditEntry {
            tenant_id: tenant_key.clone(),
            seq,
            event_type: event_type.to_string(),
            event_data,
            prev_event_hash: prev_hash,
            event_hash: event_hash.clone(),
            created_at: clasper_core::ids::now_ms(),
            linkage,
        };

        let path = self.tenant_path(&tenant_key);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(&entry).map_err(|e| AuditError::Malformed(e.to_string()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;

        cursor.last_seq = seq;
        cursor.last_hash = event_hash;
        Ok(entry)
    }

    /// All entries persisted for a tenant, in `seq` order.
    pub fn read_all(&self, tenant: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let path = self.tenant_path(tenant);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line).map_err(|e| AuditError::Malformed(e.to_string()))?);
        }
        Ok(out)
    }
}

/// Result of replaying a tenant's chain (spec §3 `AuditEntry` lifecycle, §8 P3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// `true` iff every entry's `event_hash` matches its recomputation and
    /// `seq` is gap-free starting at 1.
    pub verified: bool,
    /// The first `seq` at which the chain breaks, if any.
    pub first_bad_seq: Option<u64>,
}

/// Replay a tenant's chain from disk and verify every hash link (spec §4.5
/// `verifyAuditChain`, §8 P3).
pub fn verify_audit_chain(chain: &AuditChain, tenant: &str) -> Result<VerifyResult, AuditError> {
    let entries = chain.read_all(tenant)?;
    let mut expected_seq = 1u64;
    let mut expected_prev = genesis_hash_64();
    for entry in &entries {
        if entry.seq != expected_seq {
            return Ok(VerifyResult { verified: false, first_bad_seq: Some(entry.seq) });
        }
        if entry.prev_event_hash != expected_prev {
            return Ok(VerifyResult { verified: false, first_bad_seq: Some(entry.seq) });
        }
        let recomputed =
            compute_hash(&entry.tenant_id, entry.seq, &entry.prev_event_hash, &entry.event_type, &entry.event_data);
        if recomputed != entry.event_hash {
            return Ok(VerifyResult { verified: false, first_bad_seq: Some(entry.seq) });
        }
        expected_seq += 1;
        expected_prev = entry.event_hash.clone();
    }
    Ok(VerifyResult { verified: true, first_bad_seq: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::from("t1")
    }

    #[test]
    fn append_then_verify_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        chain.append(&tenant(), "tool_execution_blocked", serde_json::json!({"tool": "delete"}), Linkage::default()).unwrap();
        chain.append(&tenant(), "policy_decision_resolved", serde_json::json!({"decision_id": "d1"}), Linkage::default()).unwrap();
        let result = verify_audit_chain(&chain, "t1").unwrap();
        assert!(result.verified);
        assert!(result.first_bad_seq.is_none());
    }

    #[test]
    fn seq_is_monotone_and_chained() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        let e1 = chain.append(&tenant(), "a", serde_json::json!({}), Linkage::default()).unwrap();
        let e2 = chain.append(&tenant(), "b", serde_json::json!({}), Linkage::default()).unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
        assert_eq!(e2.prev_event_hash, e1.event_hash);
    }

    #[test]
    fn tampered_entry_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        chain.append(&tenant(), "a", serde_json::json!({"x": 1}), Linkage::default()).unwrap();
        chain.append(&tenant(), "b", serde_json::json!({"x": 2}), Linkage::default()).unwrap();

        // Tamper: rewrite the file with a flipped event_data on seq 1.
        let path = dir.path().join("t1.jsonl");
        let mut entries = chain.read_all("t1").unwrap();
        entries[0].event_data = serde_json::json!({"x": 999});
        let contents: String =
            entries.iter().map(|e| serde_json::to_string(e).unwrap() + "\n").collect();
        std::fs::write(&path, contents).unwrap();

        let result = verify_audit_chain(&chain, "t1").unwrap();
        assert!(!result.verified);
        assert_eq!(result.first_bad_seq, Some(1));
    }

    #[test]
    fn tenants_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        chain.append(&TenantId::from("t1"), "a", serde_json::json!({}), Linkage::default()).unwrap();
        chain.append(&TenantId::from("t2"), "a", serde_json::json!({}), Linkage::default()).unwrap();
        assert_eq!(chain.read_all("t1").unwrap().len(), 1);
        assert_eq!(chain.read_all("t2").unwrap().len(), 1);
    }

    #[test]
    fn reopening_recovers_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        {
            let chain = AuditChain::open(dir.path()).unwrap();
            chain.append(&tenant(), "a", serde_json::json!({}), Linkage::default()).unwrap();
        }
        let reopened = AuditChain::open(dir.path()).unwrap();
        let next = reopened.append(&tenant(), "b", serde_json::json!({}), Linkage::default()).unwrap();
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn stable_json_hashing_is_key_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        let e1 = chain
            .append(&TenantId::from("ta"), "a", serde_json::json!({"b": 1, "a": 2}), Linkage::default())
            .unwrap();
        let e2 = chain
            .append(&TenantId::from("tb"), "a", serde_json::json!({"a": 2, "b": 1}), Linkage::default())
            .unwrap();
        // Same seq (1), same prev hash (genesis), same tenant-independent
        // content modulo tenant id -- so hash differs only because tenant
        // differs, proving the payload itself hashed identically either way.
        assert_ne!(e1.event_hash, e2.event_hash);
        let recompute_with_other_tenant =
            compute_hash("ta", 1, &genesis_hash_64(), "a", &serde_json::json!({"a": 2, "b": 1}));
        assert_eq!(recompute_with_other_tenant, e1.event_hash);
    }
}
