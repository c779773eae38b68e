//! Process-wide control plane state (spec.md §9 "Global state"): one
//! explicit context object built once at startup and threaded into every
//! axum handler via [`axum::extract::State`]. No ambient singletons.

use clasper_audit::AuditChain;
use clasper_auth::JwtConfig;
use clasper_budget::TenantBudgets;
use clasper_ledger::DecisionLedger;
use clasper_policy::{ApprovalMode, PolicyStore};
use clasper_registry::Registry;
use clasper_telemetry::IngestStore;

/// Local-deployment identity and behavior switches read from the
/// environment at startup (spec.md §6 `Environment`).
#[derive(Clone)]
pub struct ServerConfig {
    /// The single tenant this instance serves.
    pub local_tenant_id: String,
    /// The single workspace this instance pins, if configured.
    pub local_workspace_id: Option<String>,
    /// `simulate` auto-upgrades `require_approval` to `allow`; `enforce` holds.
    pub approval_mode: ApprovalMode,
    /// Local operator API key. Empty disables operator auth (dev mode).
    pub ops_api_key: String,
    /// Enables the advanced condition operators (spec.md §4.3).
    pub policy_operators_enabled: bool,
}

/// Everything a handler needs: auth config plus every governance component.
///
/// Cheap to clone (every field is itself `Arc`-backed or a plain config
/// value), so it is stored directly in axum's `State`, not behind an extra
/// `Arc` wrapper.
#[derive(Clone)]
pub struct AppState {
    /// Local deployment identity/behavior.
    pub config: ServerConfig,
    /// Adapter token mint/verify configuration.
    pub jwt: JwtConfig,
    /// Registered adapters.
    pub registry: Registry,
    /// Installed policies.
    pub policies: PolicyStore,
    /// Decisions and tool authorizations.
    pub ledger: DecisionLedger,
    /// The hash-chained audit log.
    pub audit: AuditChain,
    /// Per-tenant cost/token counters.
    pub budgets: TenantBudgets,
    /// Idempotent telemetry sinks.
    pub ingest: IngestStore,
}
