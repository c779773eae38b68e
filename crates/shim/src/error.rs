//! The shim's error taxonomy (spec.md §7): every variant is fail-closed —
//! none of them permit the caller to proceed with the tool call.

use thiserror::Error;

/// Errors raised by the dispatch shim. All are terminal for the invocation.
#[derive(Debug, Error)]
pub enum ShimError {
    /// Invalid [`crate::config::ShimConfig`].
    #[error("shim configuration error: {0}")]
    Config(String),
    /// The decision was `deny`.
    #[error("denied: {reason}")]
    PolicyDenied {
        /// `blocked_reason` surfaced by the control plane, if any.
        reason: String,
        /// Policy ids that matched and produced the denial.
        matched_policies: Vec<String>,
    },
    /// Network error, timeout, non-2xx, or malformed JSON talking to the
    /// control plane. Fail-closed: the tool never executes.
    #[error("control plane unreachable or returned an invalid response: {0}")]
    Transport(String),
    /// The approval poll loop ran past its deadline without resolution.
    /// The pending decision is left in place on the control plane.
    #[error("approval timed out after {0}ms")]
    ApprovalTimeout(u64),
    /// The control plane returned an effect outside `{allow, deny,
    /// require_approval, pending}` — a protocol violation, always
    /// fail-closed.
    #[error("unknown decision effect: {0}")]
    UnknownEffect(String),
}
