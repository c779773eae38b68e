//! Flat, validated-at-construction shim configuration (spec.md §9
//! "Configuration objects").

use crate::error::ShimError;

/// Options for one adapter's dispatch shim instance.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// Base URL of the control plane (e.g. `http://localhost:8081`).
    pub clasper_url: String,
    /// This adapter's registered id.
    pub adapter_id: String,
    /// The adapter's bearer secret, exchanged for an `X-Adapter-Token`.
    pub adapter_secret: String,
    /// Deadline for the approval poll loop, in milliseconds.
    pub approval_wait_timeout_ms: u64,
    /// Interval between approval polls, in milliseconds.
    pub approval_poll_interval_ms: u64,
    /// TTL of an `in_flight_by_fingerprint` entry, in milliseconds.
    pub execution_reuse_window_ms: u64,
    /// Per-HTTP-call timeout, in milliseconds.
    pub request_timeout_ms: u64,
    /// Max retries on network/5xx errors for the decision call.
    pub max_retries: u32,
}

impl ShimConfig {
    /// Defaults per spec.md §9, overridden by `clasper_url`/`adapter_id`/`adapter_secret`.
    pub fn new(clasper_url: impl Into<String>, adapter_id: impl Into<String>, adapter_secret: impl Into<String>) -> Result<Self, ShimError> {
        let cfg = Self {
            clasper_url: clasper_url.into(),
            adapter_id: adapter_id.into(),
            adapter_secret: adapter_secret.into(),
            approval_wait_timeout_ms: 300_000,
            approval_poll_interval_ms: 2_000,
            execution_reuse_window_ms: 600_000,
            request_timeout_ms: 10_000,
            max_retries: 2,
        };
        cfg.validate()
    }

    fn validate(self) -> Result<Self, ShimError> {
        if self.clasper_url.trim().is_empty() {
            return Err(ShimError::Config("clasper_url must not be empty".into()));
        }
        if self.adapter_id.trim().is_empty() {
            return Err(ShimError::Config("adapter_id must not be empty".into()));
        }
        if self.adapter_secret.trim().is_empty() {
            return Err(ShimError::Config("adapter_secret must not be empty".into()));
        }
        Ok(self)
    }
}
