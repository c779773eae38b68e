//! Clasper core primitives and shared types.

#![deny(unsafe_code)]

/// Version of the clasper-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ids {
    //! ID utilities: monotonic sequence numbers, trace ids, execution ids.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate a new monotonic identifier (starts at 1). Used for in-process
    /// sequence numbers that do not need to survive a restart.
    pub fn next_monotonic_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Milliseconds since UNIX epoch (for timestamps).
    pub fn now_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    /// Opaque trace identifier (UUID v4 string).
    pub fn new_trace_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// A fresh `execution_id`. Spec mandates UUIDv7 so ids are roughly
    /// time-ordered, which keeps ledger and audit scans cheap to paginate.
    pub fn new_execution_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// A fresh opaque id for decisions, policies (when not operator-supplied),
    /// and adapter tokens.
    pub fn new_id(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn monotonic_increments() {
            let a = next_monotonic_id();
            let b = next_monotonic_id();
            assert!(b > a);
        }

        #[test]
        fn trace_id_format() {
            let t = new_trace_id();
            assert_eq!(t.len(), 36);
            assert!(t.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
        }

        #[test]
        fn execution_id_is_v7() {
            let e = new_execution_id();
            let parsed = Uuid::parse_str(&e).unwrap();
            assert_eq!(parsed.get_version_num(), 7);
        }
    }
}

pub mod stable_json {
    //! Canonical JSON serialization: sorted keys, no incidental whitespace.
    //!
    //! Used anywhere a byte-stable representation of a JSON value is hashed
    //! (the audit chain's `event_hash`, wizard-created policy summaries).

    use serde_json::Value;
    use std::collections::BTreeMap;

    /// Render `value` as canonical JSON: object keys sorted recursively,
    /// compact separators. Two calls on semantically-equal values (same
    /// keys/values, any insertion order) always produce identical bytes.
    #[must_use]
    pub fn stringify(value: &Value) -> String {
        serde_json::to_string(&canonicalize(value)).expect("canonical value always serializes")
    }

    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
                let mut out = serde_json::Map::with_capacity(sorted.len());
                for (k, v) in sorted {
                    out.insert(k, v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }

}

pub mod identity {
    //! Tenant/workspace scoping newtypes shared by every downstream crate.

    use serde::{Deserialize, Serialize};

    /// Opaque tenant identifier. The local instance presents exactly one
    /// tenant (spec Non-goals: no multi-tenant RBAC), but the type is kept
    /// distinct from `String` so call sites can't accidentally swap it with
    /// a workspace id or adapter id.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct TenantId(pub String);

    /// Opaque workspace identifier, scoped within a tenant.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct WorkspaceId(pub String);

    impl From<&str> for TenantId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }
    impl From<&str> for WorkspaceId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }
    impl std::fmt::Display for TenantId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::fmt::Display for WorkspaceId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
}

/// Crate-wide error taxonomy shared across the control-plane binaries.
///
/// Downstream crates define their own narrower error enums (e.g.
/// `clasper_auth::AuthError`) and convert into this one only at the HTTP
/// handler boundary, where §7's `{error, code}` envelope is rendered.
pub mod error {
    use thiserror::Error;

    /// A taxonomy tag matching spec.md §7's machine-readable `code` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ErrorCode {
        /// Missing or malformed adapter/operator token.
        MissingToken,
        /// Token failed signature or claim verification.
        InvalidToken,
        /// A required claim was absent.
        MissingClaim,
        /// Local configuration is invalid (e.g. unsupported JWT algorithm).
        ConfigError,
        /// Request body failed validation.
        Validation,
        /// A policy produced a `deny` effect.
        PolicyDenied,
        /// An operator action requires acknowledgement it did not provide.
        WizardAckRequired,
        /// An internal/storage failure that isn't attributable to the caller.
        Internal,
    }

    impl ErrorCode {
        /// The wire string used in HTTP error bodies.
        #[must_use]
        pub fn as_str(self) -> &'static str {
            match self {
                Self::MissingToken => "missing_token",
                Self::InvalidToken => "invalid_token",
                Self::MissingClaim => "missing_claim",
                Self::ConfigError => "config_error",
                Self::Validation => "validation",
                Self::PolicyDenied => "policy_denied",
                Self::WizardAckRequired => "wizard_allow_ack_required",
                Self::Internal => "internal",
            }
        }
    }

    /// Generic control-plane error carrying an HTTP-mappable code.
    #[derive(Debug, Error)]
    #[error("{message}")]
    pub struct ClasperError {
        /// Machine-readable classification.
        pub code: ErrorCode,
        /// Human-readable detail.
        pub message: String,
    }

    impl ClasperError {
        /// Construct an error with the given code and message.
        pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
            Self { code, message: message.into() }
        }
    }
}
