//! Wire DTOs for the control-plane HTTP surface (spec.md §6). Deliberately
//! separate from `clasper-ledger`'s server-side model: the shim only needs
//! the fields it acts on, and lives in a different process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of `POST /api/execution/request` and the relevant subset
/// of `GET /api/execution/:execution_id`.
///
/// `effect` is deliberately a raw [`String`], not `clasper_policy::EffectDecision`:
/// this crate lives in a different process than the control plane and must
/// treat the wire as untrusted. A server on an older/newer protocol version
/// can send an effect this shim doesn't recognize, and that must fail closed
/// (spec.md §4.6 "Anything else -> fail closed with an unknown-effect
/// error") rather than fail to deserialize the whole response.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionResponse {
    /// Row id, used to address `/api/decisions/:id/resolve` if surfaced
    /// to an operator UI outside the shim's own flow.
    pub decision_id: String,
    /// The execution this decision concerns.
    pub execution_id: String,
    /// The resolved effect as of this read, as the literal wire string
    /// (`"allow"`, `"deny"`, `"require_approval"`, or anything else).
    pub effect: String,
    /// Lifecycle status (`pending`, `approved`, `denied`, `rejected`).
    pub status: String,
    /// Present when `effect = deny`.
    #[serde(default)]
    pub blocked_reason: Option<String>,
    /// First matched policy ids, for error messages.
    #[serde(default)]
    pub matched_policies: Vec<String>,
    /// Opaque; the shim does not interpret its shape.
    #[serde(default)]
    pub granted_scope: Option<Value>,
}

/// Response body of `GET /api/execution/:execution_id` (spec.md §6): the
/// poll loop's view, which unlike [`DecisionResponse`] never carries
/// `granted_scope` — the wire contract the server exposes for this route is
/// deliberately narrower.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    /// The execution this status concerns.
    pub execution_id: String,
    /// The resolved effect as of this read, as the literal wire string.
    pub effect: String,
    /// Row id of the underlying decision.
    pub decision_id: String,
    /// `"local"`, `"cloud"`, or absent while still pending.
    #[serde(default)]
    pub approval_type: Option<String>,
}

/// Body of `POST /adapters/register`.
#[derive(Debug, Serialize)]
pub struct RegisterBody<'a> {
    /// Adapter identifier.
    pub adapter_id: &'a str,
    /// Adapter-reported version string.
    pub version: &'a str,
    /// Human-friendly display name.
    pub display_name: &'a str,
    /// Declared risk class (`low`, `medium`, `high`, `critical`).
    pub risk_class: &'a str,
    /// Declared capabilities.
    pub capabilities: &'a [String],
}

/// Response body of `POST /adapters/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    /// Freshly minted `X-Adapter-Token`.
    pub token: String,
}
