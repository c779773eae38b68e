//! `clasper-server`: the HTTP + JSON control plane binary (spec.md §6, §9).

use std::net::SocketAddr;

use clasper_audit::AuditChain;
use clasper_auth::JwtConfig;
use clasper_budget::TenantBudgets;
use clasper_ledger::DecisionLedger;
use clasper_policy::{ApprovalMode, PolicyStore};
use clasper_registry::Registry;
use clasper_server::routes;
use clasper_server::state::{AppState, ServerConfig};
use clasper_telemetry::IngestStore;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_approval_mode() -> ApprovalMode {
    if let Ok(v) = std::env::var("CLASPER_APPROVAL_MODE") {
        return match v.as_str() {
            "simulate" => ApprovalMode::Simulate,
            _ => ApprovalMode::Enforce,
        };
    }
    // Back-compat alias (spec.md §6).
    match std::env::var("CLASPER_REQUIRE_APPROVAL_IN_CORE").as_deref() {
        Ok("allow") => ApprovalMode::Simulate,
        _ => ApprovalMode::Enforce,
    }
}

#[tokio::main]
async fn main() {
    clasper_telemetry::init_json_logging();

    let jwt_secret = std::env::var("ADAPTER_JWT_SECRET")
        .unwrap_or_else(|_| {
            tracing::error!("ADAPTER_JWT_SECRET is required; refusing to start with an unauthenticated adapter surface");
            std::process::exit(1);
        });
    let jwt_algorithm = env_or("ADAPTER_JWT_ALGORITHM", "HS256");
    let jwt = JwtConfig::new(jwt_secret, &jwt_algorithm).unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid JWT configuration");
        std::process::exit(1);
    });

    let config = ServerConfig {
        local_tenant_id: env_or("CLASPER_LOCAL_TENANT_ID", "default"),
        local_workspace_id: std::env::var("CLASPER_LOCAL_WORKSPACE_ID").ok(),
        approval_mode: parse_approval_mode(),
        ops_api_key: env_or("OPS_LOCAL_API_KEY", ""),
        policy_operators_enabled: env_or("CLASPER_POLICY_OPERATORS", "false") == "true",
    };

    let audit_dir = env_or("CLASPER_AUDIT_DIR", "./data/audit");
    let audit = AuditChain::open(&audit_dir).unwrap_or_else(|e| {
        tracing::error!(error = %e, dir = %audit_dir, "failed to open audit chain");
        std::process::exit(1);
    });

    let policies = PolicyStore::new();
    if let Ok(path) = std::env::var("CLASPER_POLICY_SEED_PATH") {
        match policies.load_yaml_path(&path) {
            Ok(n) => tracing::info!(count = n, path = %path, "loaded seed policies"),
            Err(e) => tracing::warn!(error = %e, path = %path, "failed to load seed policies"),
        }
    }

    let state = AppState {
        config,
        jwt,
        registry: Registry::new(),
        policies,
        ledger: DecisionLedger::new(),
        audit,
        budgets: TenantBudgets::new(),
        ingest: IngestStore::new(),
    };

    let port: u16 = env_or("CLASPER_PORT", "8081").parse().unwrap_or(8081);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "clasper-server listening");

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, %addr, "failed to bind");
        std::process::exit(1);
    });
    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "server terminated");
        std::process::exit(1);
    });
}
