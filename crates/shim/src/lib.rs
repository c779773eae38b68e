//! Adapter Dispatch Shim (spec.md §4.6): the piece of this system that
//! lives *in* the adapter process rather than the control plane.
//!
//! Every tool invocation passes through [`Shim::dispatch`]: fingerprint it,
//! ask the control plane for a decision, block on an approval poll when
//! required, and execute the underlying tool only once an `allow` is held.
//! Every exit that isn't a clean allow is fail-closed — network errors,
//! timeouts, and unrecognized effects all raise instead of letting the
//! tool run (spec.md §8 P6).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod wire;

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};

pub use config::ShimConfig;
pub use context::map_context;
pub use error::ShimError;
pub use fingerprint::{command_class, fingerprint, normalize_tool, targets_key, SessionContext};

use clasper_policy::{ExecutionRequest, Provenance};
use wire::{DecisionResponse, PollResponse, RegisterBody, RegisterResponse};

const BACKOFF_START_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 4_000;

/// One in-flight fingerprint's reuse window (spec.md §4.6, §9 "Resource
/// scoping"). Adapter-local only — never persisted, never shared across
/// processes (spec.md §3 "Ownership").
#[derive(Debug, Clone)]
struct InFlightEntry {
    execution_id: String,
    expires_at_ms: u64,
}

/// A reported cost for one tool invocation, forwarded to the control plane
/// as a `cost` telemetry envelope after a successful execution. `None` when
/// the adapter doesn't measure cost for this tool (spec.md §4.6
/// "if the adapter measured a cost").
#[derive(Debug, Clone, Copy, Default)]
pub struct CostMeasurement {
    /// Tokens consumed by the underlying call, if applicable.
    pub tokens: u64,
    /// Cost in micros of the billing currency.
    pub cost_micros: u64,
}

/// Everything the shim needs to build one [`ExecutionRequest`]: the raw
/// tool invocation as the adapter sees it, plus the identity fields the
/// control plane requires (spec §3).
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Raw tool name, before alias normalization.
    pub tool: String,
    /// Raw tool arguments, mapped into `context` by [`context::map_context`].
    pub args: Value,
    /// Coarse tool grouping, if the adapter declares one.
    pub tool_group: Option<String>,
    /// Capabilities this invocation needs.
    pub requested_capabilities: Vec<String>,
    /// Skill this invocation runs under, if any.
    pub skill: Option<String>,
    /// Heuristic free-text intent, if available.
    pub intent: Option<String>,
    /// Where this request originated, if known.
    pub provenance: Option<Provenance>,
    /// Session-identifying fields, used only for fingerprinting.
    pub session: SessionContext,
    /// Tenant scope.
    pub tenant_id: String,
    /// Workspace scope, if the deployment pins one.
    pub workspace_id: Option<String>,
}

/// Outcome of a dispatch that reached an `allow` and executed the
/// underlying tool.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// The execution id this invocation was decided (and ran) under.
    pub execution_id: String,
    /// The scope the control plane granted, opaque to the shim. `None` when
    /// the allow came from a resolved approval poll, since `GET
    /// /api/execution/:execution_id` does not echo `granted_scope`
    /// (spec.md §6).
    pub granted_scope: Option<Value>,
}

enum PollOutcome {
    Allowed,
    Denied,
}

/// The in-adapter-process dispatch shim (spec §4.6).
pub struct Shim {
    config: ShimConfig,
    client: Client,
    token: std::sync::Mutex<Option<String>>,
    in_flight: DashMap<String, InFlightEntry>,
}

impl Shim {
    /// Construct a shim over a validated [`ShimConfig`].
    #[must_use]
    pub fn new(config: ShimConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("reqwest client builds with a finite, positive timeout");
        Self { config, client, token: std::sync::Mutex::new(None), in_flight: DashMap::new() }
    }

    fn current_token(&self) -> Result<String, ShimError> {
        self.token
            .lock()
            .expect("shim token lock poisoned")
            .clone()
            .ok_or_else(|| ShimError::Config("adapter is not registered; call Shim::register first".into()))
    }

    /// Exchange the configured adapter secret for a fresh `X-Adapter-Token`
    /// via `POST /adapters/register` (spec §4.2, §6). Safe to call again
    /// later to rotate the token before it expires.
    #[instrument(skip(self, capabilities), fields(adapter_id = %self.config.adapter_id))]
    pub async fn register(
        &self,
        version: &str,
        display_name: &str,
        risk_class: &str,
        capabilities: &[String],
    ) -> Result<(), ShimError> {
        let url = format!("{}/adapters/register", self.config.clasper_url);
        let body = RegisterBody { adapter_id: &self.config.adapter_id, version, display_name, risk_class, capabilities };
        let resp = self
            .client
            .post(&url)
            .header("X-Adapter-Token", self.config.adapter_secret.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ShimError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ShimError::Transport(format!("register returned {}", resp.status())));
        }
        let parsed: RegisterResponse = resp.json().await.map_err(|e| ShimError::Transport(e.to_string()))?;
        *self.token.lock().expect("shim token lock poisoned") = Some(parsed.token);
        Ok(())
    }

    fn sweep_expired(&self, now_ms: u64) {
        self.in_flight.retain(|_, entry| entry.expires_at_ms > now_ms);
    }

    /// Dispatch one tool invocation: fingerprint, decide, poll if pending,
    /// execute only on `allow`. `execute` runs the underlying tool and is
    /// invoked at most once, only after an `allow` is held; it returns its
    /// own output alongside an optional measured cost.
    #[instrument(skip(self, call, execute), fields(tool = %call.tool))]
    pub async fn dispatch<F, Fut, T>(&self, call: ToolCall, execute: F) -> Result<(DispatchReceipt, T), ShimError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (T, Option<CostMeasurement>)>,
    {
        let normalized_tool = normalize_tool(&call.tool);
        let context = map_context(&normalized_tool, &call.args);
        let argv0 = context.exec.as_ref().and_then(|e| e.argv0.as_deref());
        let fp = fingerprint(&self.config.adapter_id, &normalized_tool, &call.session, &context.targets, argv0);

        let now = clasper_core::ids::now_ms();
        self.sweep_expired(now);

        let (execution_id, reused) = match self.in_flight.get(&fp) {
            Some(entry) if entry.expires_at_ms > now => (entry.execution_id.clone(), true),
            _ => (clasper_core::ids::new_execution_id(), false),
        };

        let request = ExecutionRequest {
            execution_id: execution_id.clone(),
            adapter_id: self.config.adapter_id.clone(),
            tenant_id: call.tenant_id.clone(),
            workspace_id: call.workspace_id.clone(),
            requested_capabilities: call.requested_capabilities,
            tool: Some(normalized_tool),
            tool_group: call.tool_group,
            skill: call.skill,
            intent: call.intent,
            context,
            provenance: call.provenance,
        };

        let decision = self.request_decision(&request).await?;

        match decision.effect.as_str() {
            "deny" => {
                self.in_flight.remove(&fp);
                self.post_audit_best_effort(
                    &call.tenant_id,
                    &execution_id,
                    "tool_execution_blocked",
                    serde_json::json!({
                        "blocked_reason": decision.blocked_reason,
                        "matched_policies": decision.matched_policies,
                    }),
                )
                .await;
                Err(ShimError::PolicyDenied {
                    reason: decision.blocked_reason.unwrap_or_else(|| "denied by policy".to_string()),
                    matched_policies: decision.matched_policies,
                })
            }
            "require_approval" => {
                let expires_at_ms = now + self.config.execution_reuse_window_ms;
                self.in_flight
                    .insert(fp.clone(), InFlightEntry { execution_id: execution_id.clone(), expires_at_ms });
                if reused {
                    self.post_audit_best_effort(&call.tenant_id, &execution_id, "approval_pending_reused", Value::Null)
                        .await;
                }

                match self.poll_until_resolved(&execution_id).await {
                    Ok(PollOutcome::Allowed) => {
                        self.in_flight.remove(&fp);
                        let (output, cost) = execute().await;
                        self.report_completion(&call.tenant_id, &execution_id, cost).await;
                        Ok((DispatchReceipt { execution_id, granted_scope: None }, output))
                    }
                    Ok(PollOutcome::Denied) => {
                        self.in_flight.remove(&fp);
                        Err(ShimError::PolicyDenied {
                            reason: "denied by operator during approval".to_string(),
                            matched_policies: Vec::new(),
                        })
                    }
                    // Deliberately do not clear the in-flight entry on
                    // timeout or transport error: subsequent retries of the
                    // same logical request keep blocking under the same
                    // execution_id until the operator acts or the entry
                    // ages out (spec.md §4.6).
                    Err(e) => Err(e),
                }
            }
            "allow" => {
                self.in_flight.remove(&fp);
                let (output, cost) = execute().await;
                self.report_completion(&call.tenant_id, &execution_id, cost).await;
                Ok((DispatchReceipt { execution_id, granted_scope: decision.granted_scope }, output))
            }
            other => Err(ShimError::UnknownEffect(other.to_string())),
        }
    }

    /// `POST /api/execution/request`, retrying network errors and 5xx
    /// responses with capped exponential backoff (spec.md §5, §9). Any
    /// other failure is fail-closed immediately.
    async fn request_decision(&self, request: &ExecutionRequest) -> Result<DecisionResponse, ShimError> {
        let token = self.current_token()?;
        let url = format!("{}/api/execution/request", self.config.clasper_url);
        let mut attempt = 0u32;
        let mut backoff_ms = BACKOFF_START_MS;
        loop {
            let outcome = self.client.post(&url).header("X-Adapter-Token", token.as_str()).json(request).send().await;
            match outcome {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<DecisionResponse>().await.map_err(|e| ShimError::Transport(e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(status = %resp.status(), attempt, "decision request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                }
                Ok(resp) => return Err(ShimError::Transport(format!("decision request returned {}", resp.status()))),
                Err(e) if attempt < self.config.max_retries && (e.is_timeout() || e.is_connect()) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "decision request unreachable, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                }
                Err(e) => return Err(ShimError::Transport(e.to_string())),
            }
        }
    }

    /// `GET /api/execution/:execution_id` on a `poll_interval` timer until
    /// the ledger reports a terminal effect or the deadline elapses
    /// (spec.md §4.6). Any polling HTTP error is fail-closed.
    async fn poll_until_resolved(&self, execution_id: &str) -> Result<PollOutcome, ShimError> {
        let token = self.current_token()?;
        let url = format!("{}/api/execution/{execution_id}", self.config.clasper_url);
        let deadline = Instant::now() + Duration::from_millis(self.config.approval_wait_timeout_ms);
        let mut iterations: u64 = 0;

        loop {
            if Instant::now() >= deadline {
                return Err(ShimError::ApprovalTimeout(self.config.approval_wait_timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(self.config.approval_poll_interval_ms)).await;
            iterations += 1;

            let resp = self
                .client
                .get(&url)
                .header("X-Adapter-Token", token.as_str())
                .send()
                .await
                .map_err(|e| ShimError::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ShimError::Transport(format!("approval poll returned {}", resp.status())));
            }
            let parsed: PollResponse = resp.json().await.map_err(|e| ShimError::Transport(e.to_string()))?;

            if iterations % 5 == 0 {
                info!(execution_id, iterations, "still awaiting approval");
            }

            match parsed.effect.as_str() {
                "allow" => return Ok(PollOutcome::Allowed),
                "deny" => return Ok(PollOutcome::Denied),
                "require_approval" => {}
                other => return Err(ShimError::UnknownEffect(other.to_string())),
            }
        }
    }

    /// Best-effort `POST /api/ingest/audit`. Telemetry errors never
    /// propagate to the caller — governance was already enforced at
    /// decision time (spec.md §4.6, §7).
    async fn post_audit_best_effort(&self, tenant_id: &str, execution_id: &str, event_type: &str, event_data: Value) {
        let Ok(token) = self.current_token() else { return };
        let url = format!("{}/api/ingest/audit", self.config.clasper_url);
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "execution_id": execution_id,
            "adapter_id": self.config.adapter_id,
            "event_type": event_type,
            "event_data": event_data,
        });
        if let Err(e) = self.client.post(&url).header("X-Adapter-Token", token).json(&body).send().await {
            warn!(error = %e, execution_id, event_type, "telemetry audit post failed, ignoring");
        }
    }

    /// Best-effort post-execution telemetry: `tool_execution_completed`
    /// audit, plus a `cost` envelope when the adapter measured one
    /// (spec.md §4.6).
    async fn report_completion(&self, tenant_id: &str, execution_id: &str, cost: Option<CostMeasurement>) {
        self.post_audit_best_effort(tenant_id, execution_id, "tool_execution_completed", Value::Null).await;

        let Some(cost) = cost else { return };
        let Ok(token) = self.current_token() else { return };
        let url = format!("{}/api/ingest/cost", self.config.clasper_url);
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "execution_id": execution_id,
            "adapter_id": self.config.adapter_id,
            "tokens": cost.tokens,
            "cost_micros": cost.cost_micros,
        });
        if let Err(e) = self.client.post(&url).header("X-Adapter-Token", token).json(&body).send().await {
            warn!(error = %e, execution_id, "telemetry cost post failed, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MockServer {
        poll_count: Arc<AtomicU64>,
        resolve_after: u64,
    }

    async fn register(State(_): State<MockServer>) -> Json<Value> {
        Json(json!({"token": "adapter-token"}))
    }

    async fn decide_allow(State(_): State<MockServer>) -> Json<Value> {
        Json(json!({
            "decision_id": "d1", "execution_id": "e1", "effect": "allow", "status": "approved",
            "blocked_reason": null, "matched_policies": [], "granted_scope": {"capabilities": ["read"]},
        }))
    }

    async fn decide_deny(State(_): State<MockServer>) -> Json<Value> {
        Json(json!({
            "decision_id": "d1", "execution_id": "e1", "effect": "deny", "status": "denied",
            "blocked_reason": "deletes are never auto-allowed", "matched_policies": ["openclaw-deny-delete-file"],
            "granted_scope": null,
        }))
    }

    async fn decide_pending(State(_): State<MockServer>) -> Json<Value> {
        Json(json!({
            "decision_id": "d1", "execution_id": "e1", "effect": "require_approval", "status": "pending",
            "blocked_reason": null, "matched_policies": ["openclaw-require-approval-exec"], "granted_scope": null,
        }))
    }

    async fn poll_resolves_after(State(state): State<MockServer>, Path(_): Path<String>) -> Json<Value> {
        let n = state.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        let effect = if n >= state.resolve_after { "allow" } else { "require_approval" };
        Json(json!({"execution_id": "e1", "effect": effect, "decision_id": "d1", "approval_type": null}))
    }

    async fn poll_never_resolves(State(_): State<MockServer>, Path(_): Path<String>) -> Json<Value> {
        Json(json!({"execution_id": "e1", "effect": "require_approval", "decision_id": "d1", "approval_type": null}))
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn call(tool: &str, args: Value) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args,
            tool_group: None,
            requested_capabilities: vec![tool.to_string()],
            skill: None,
            intent: None,
            provenance: None,
            session: SessionContext { session_key: Some("sess-1".into()), ..Default::default() },
            tenant_id: "t1".into(),
            workspace_id: None,
        }
    }

    async fn registered_shim(base_url: String) -> Shim {
        let shim = Shim::new(ShimConfig::new(base_url, "openclaw-local", "bootstrap-secret").unwrap());
        shim.register("1.0.0", "OpenClaw Local", "high", &["read".into(), "exec".into(), "delete".into()])
            .await
            .unwrap();
        shim
    }

    #[tokio::test]
    async fn allow_executes_the_tool_exactly_once() {
        let router = Router::new()
            .route("/adapters/register", post(register))
            .route("/api/execution/request", post(decide_allow))
            .with_state(MockServer::default());
        let base = spawn(router).await;
        let shim = registered_shim(base).await;

        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let (receipt, output) = shim
            .dispatch(call("read", json!({"path": "/tmp/x"})), || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                ("ok", None)
            })
            .await
            .unwrap();

        assert_eq!(output, "ok");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(receipt.granted_scope.is_some());
    }

    #[tokio::test]
    async fn deny_never_executes_the_tool() {
        let router = Router::new()
            .route("/adapters/register", post(register))
            .route("/api/execution/request", post(decide_deny))
            .with_state(MockServer::default());
        let base = spawn(router).await;
        let shim = registered_shim(base).await;

        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let err = shim
            .dispatch(call("delete", json!({"path": "/tmp/x"})), || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                ((), None)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShimError::PolicyDenied { .. }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approval_poll_executes_once_resolved() {
        let state = MockServer { poll_count: Arc::new(AtomicU64::new(0)), resolve_after: 2 };
        let router = Router::new()
            .route("/adapters/register", post(register))
            .route("/api/execution/request", post(decide_pending))
            .route("/api/execution/:execution_id", get(poll_resolves_after))
            .with_state(state);
        let base = spawn(router).await;
        let shim = Shim::new(ShimConfig {
            approval_poll_interval_ms: 10,
            approval_wait_timeout_ms: 5_000,
            ..ShimConfig::new(base, "openclaw-local", "bootstrap-secret").unwrap()
        });
        shim.register("1.0.0", "OpenClaw Local", "high", &["exec".into()]).await.unwrap();

        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let (_, output) = shim
            .dispatch(call("exec", json!({"command": "rm -rf /tmp/scratch"})), || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                ("done", None)
            })
            .await
            .unwrap();

        assert_eq!(output, "done");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approval_timeout_fails_closed_and_never_executes() {
        let router = Router::new()
            .route("/adapters/register", post(register))
            .route("/api/execution/request", post(decide_pending))
            .route("/api/execution/:execution_id", get(poll_never_resolves))
            .with_state(MockServer::default());
        let base = spawn(router).await;
        let shim = Shim::new(ShimConfig {
            approval_poll_interval_ms: 10,
            approval_wait_timeout_ms: 50,
            ..ShimConfig::new(base, "openclaw-local", "bootstrap-secret").unwrap()
        });
        shim.register("1.0.0", "OpenClaw Local", "high", &["exec".into()]).await.unwrap();

        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let err = shim
            .dispatch(call("exec", json!({"command": "rm -rf /tmp/scratch"})), || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                ((), None)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShimError::ApprovalTimeout(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_control_plane_fails_closed() {
        // Nothing listens on this port.
        let shim = Shim::new(ShimConfig::new("http://127.0.0.1:1", "openclaw-local", "bootstrap-secret").unwrap());
        *shim.token.lock().unwrap() = Some("fake-token".into());

        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let err = shim
            .dispatch(call("read", json!({"path": "/tmp/x"})), || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                ((), None)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShimError::Transport(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_session_reuses_execution_id_while_pending() {
        let state = MockServer { poll_count: Arc::new(AtomicU64::new(0)), resolve_after: u64::MAX };
        let router = Router::new()
            .route("/adapters/register", post(register))
            .route("/api/execution/request", post(decide_pending))
            .route("/api/execution/:execution_id", get(poll_resolves_after))
            .with_state(state);
        let base = spawn(router).await;
        let shim = Shim::new(ShimConfig {
            approval_poll_interval_ms: 10_000,
            approval_wait_timeout_ms: 50,
            ..ShimConfig::new(base, "openclaw-local", "bootstrap-secret").unwrap()
        });
        shim.register("1.0.0", "OpenClaw Local", "high", &["exec".into()]).await.unwrap();

        let args = json!({"command": "rm -rf /tmp/scratch"});
        let normalized = normalize_tool("exec");
        let ctx = map_context(&normalized, &args);
        let session = SessionContext { session_key: Some("sess-1".into()), ..Default::default() };
        let fp = fingerprint("openclaw-local", &normalized, &session, &ctx.targets, ctx.exec.as_ref().and_then(|e| e.argv0.as_deref()));

        let _ = shim.dispatch(call("exec", args.clone()), || async move { ((), None) }).await;
        let first_execution_id = shim.in_flight.get(&fp).map(|e| e.execution_id.clone());
        let _ = shim.dispatch(call("exec", args), || async move { ((), None) }).await;
        let second_execution_id = shim.in_flight.get(&fp).map(|e| e.execution_id.clone());

        assert!(first_execution_id.is_some());
        assert_eq!(first_execution_id, second_execution_id);
    }
}
