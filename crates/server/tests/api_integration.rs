//! End-to-end coverage of the control-plane HTTP surface, driven directly
//! against the axum [`Router`] (no socket) per spec.md §8's scenarios.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use clasper_audit::AuditChain;
use clasper_auth::JwtConfig;
use clasper_budget::TenantBudgets;
use clasper_ledger::DecisionLedger;
use clasper_policy::{ApprovalMode, PolicyStore};
use clasper_registry::Registry;
use clasper_server::routes::router;
use clasper_server::state::{AppState, ServerConfig};

const TENANT: &str = "acme";

fn build_state(dir: &std::path::Path) -> AppState {
    AppState {
        config: ServerConfig {
            local_tenant_id: TENANT.to_string(),
            local_workspace_id: None,
            approval_mode: ApprovalMode::Enforce,
            ops_api_key: String::new(),
            policy_operators_enabled: true,
        },
        jwt: JwtConfig::new("test-secret-test-secret".to_string(), "HS256").unwrap(),
        registry: Registry::new(),
        policies: PolicyStore::new(),
        ledger: DecisionLedger::new(),
        audit: AuditChain::open(dir).unwrap(),
        budgets: TenantBudgets::new(),
        ingest: clasper_telemetry::IngestStore::new(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn req(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("X-Adapter-Token", t);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn register_adapter(state: &AppState) -> (String, String) {
    let bootstrap = clasper_auth::mint_bootstrap_token(&state.jwt, TENANT).unwrap();
    let app = router(state.clone());
    let response = app
        .oneshot(req(
            "POST",
            "/adapters/register",
            Some(&bootstrap),
            json!({
                "adapter_id": "adapter-1",
                "version": "1.0.0",
                "display_name": "Test Adapter",
                "risk_class": "low",
                "capabilities": ["read", "delete"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    ("adapter-1".to_string(), body["token"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let response = router(state).oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["audit_chain"], "ok");
}

#[tokio::test]
async fn register_then_request_decision_with_no_policies_falls_back_to_require_approval() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let (adapter_id, token) = register_adapter(&state).await;

    let response = router(state.clone())
        .oneshot(req(
            "POST",
            "/api/execution/request",
            Some(&token),
            json!({
                "execution_id": "exec-1",
                "adapter_id": adapter_id,
                "tenant_id": TENANT,
                "workspace_id": null,
                "requested_capabilities": ["delete"],
                "tool": "delete_file",
                "tool_group": null,
                "skill": null,
                "intent": null,
                "context": {"side_effects": {}},
                "provenance": null,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let decision = body_json(response).await;
    assert_eq!(decision["effect"], "require_approval");
    assert_eq!(decision["policy_fallback_hit"], true);
    assert_eq!(decision["status"], "pending");
}

#[tokio::test]
async fn request_without_adapter_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let response = router(state)
        .oneshot(req(
            "POST",
            "/api/execution/request",
            None,
            json!({
                "execution_id": "exec-2",
                "adapter_id": "adapter-1",
                "tenant_id": TENANT,
                "requested_capabilities": [],
                "context": {"side_effects": {}},
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "missing_token");
}

#[tokio::test]
async fn operator_can_resolve_a_pending_decision() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let (adapter_id, token) = register_adapter(&state).await;

    let response = router(state.clone())
        .oneshot(req(
            "POST",
            "/api/execution/request",
            Some(&token),
            json!({
                "execution_id": "exec-3",
                "adapter_id": adapter_id,
                "tenant_id": TENANT,
                "requested_capabilities": ["delete"],
                "tool": "delete_file",
                "context": {"side_effects": {}},
            }),
        ))
        .await
        .unwrap();
    let decision = body_json(response).await;
    let decision_id = decision["decision_id"].as_str().unwrap().to_string();

    let response = router(state.clone())
        .oneshot(req(
            "POST",
            &format!("/api/decisions/{decision_id}/resolve"),
            None,
            json!({"action": "approve", "justification": "reviewed manually offline"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolved = body_json(response).await;
    assert_eq!(resolved["status"], "approved");

    let response = router(state)
        .oneshot(req(
            "POST",
            &format!("/api/decisions/{decision_id}/resolve"),
            None,
            json!({"action": "approve", "justification": "reviewed manually offline"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_trace_is_idempotent_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let (adapter_id, token) = register_adapter(&state).await;

    let envelope = json!({
        "tenant_id": TENANT,
        "execution_id": "exec-4",
        "adapter_id": adapter_id,
        "steps": [{"name": "fetch", "data": {}}],
        "granted_scope": {},
        "used_scope": {},
        "violations": [],
        "integrity_root": null,
    });

    let first = router(state.clone()).oneshot(req("POST", "/api/ingest/trace", Some(&token), envelope.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["status"], "ok");

    let second = router(state).oneshot(req("POST", "/api/ingest/trace", Some(&token), envelope)).await.unwrap();
    assert_eq!(body_json(second).await["status"], "duplicate");
}

#[tokio::test]
async fn wizard_created_allow_policy_without_acknowledgement_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let response = router(state)
        .oneshot(req(
            "POST",
            "/ops/api/policies",
            None,
            json!({
                "policy_id": "pol-1",
                "scope": {"tenant": TENANT, "workspace": null},
                "subject": {"type": "tool", "name": "delete_file"},
                "conditions": {},
                "effect": {"decision": "allow"},
                "precedence": 10,
                "enabled": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "wizard_allow_ack_required");
}

#[tokio::test]
async fn advanced_operators_are_rejected_unless_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = build_state(dir.path());
    state.config.policy_operators_enabled = false;

    let body = json!({
        "policy_id": "pol-advanced",
        "scope": {"tenant": TENANT, "workspace": null},
        "subject": {"type": "tool", "name": "exec"},
        "conditions": {"context.exec.argv0": {"in": ["ls", "pwd"]}},
        "effect": {"decision": "deny"},
        "precedence": 10,
        "enabled": true,
    });

    let response = router(state.clone()).oneshot(req("POST", "/ops/api/policies", None, body.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "validation");

    state.config.policy_operators_enabled = true;
    let response = router(state).oneshot(req("POST", "/ops/api/policies", None, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
