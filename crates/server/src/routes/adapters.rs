//! `POST /adapters/register` (spec.md §6, §4.2).

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use clasper_auth::{mint_adapter_token, verify_adapter_token, verify_bootstrap_token, MintClaims};
use clasper_core::error::{ClasperError, ErrorCode};
use clasper_core::identity::TenantId;
use clasper_registry::AdapterRegistration;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct RegisterResponse {
    #[serde(flatten)]
    adapter: clasper_registry::Adapter,
    token: String,
}

/// Requires either a valid adapter token (re-registration) or a bootstrap
/// token minted from the shared secret (first-time registration).
pub async fn register(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(registration): Json<AdapterRegistration>,
) -> Result<Json<RegisterResponse>, ServerError> {
    let token = headers
        .get("X-Adapter-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::from(ClasperError::new(ErrorCode::MissingToken, "missing X-Adapter-Token")))?;

    let is_reregistration = verify_adapter_token(
        token,
        &app.jwt,
        &app.config.local_tenant_id,
        app.config.local_workspace_id.as_deref(),
    )
    .is_ok();

    if !is_reregistration {
        verify_bootstrap_token(token, &app.jwt)?;
    }

    let tenant = TenantId::from(app.config.local_tenant_id.as_str());
    let capabilities = registration.capabilities.clone();
    let adapter = app.registry.register(&tenant, registration);

    let fresh_token = mint_adapter_token(
        &app.jwt,
        MintClaims {
            adapter_id: adapter.adapter_id.clone(),
            tenant_id: app.config.local_tenant_id.clone(),
            workspace_id: app.config.local_workspace_id.clone(),
            allowed_capabilities: capabilities,
            ttl_secs: clasper_auth::DEFAULT_TOKEN_TTL_SECS,
        },
    )?;

    Ok(Json(RegisterResponse { adapter, token: fresh_token }))
}
