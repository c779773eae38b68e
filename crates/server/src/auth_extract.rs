//! Axum extractors for the two token headers (spec.md §6 `Tokens`):
//! `X-Adapter-Token` and `X-Ops-Api-Key`.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use clasper_auth::{verify_adapter_token, AdapterContext};
use clasper_core::error::{ClasperError, ErrorCode};

use crate::error::ServerError;
use crate::state::AppState;

/// The verified caller of an adapter-authenticated route.
pub struct Adapter(pub AdapterContext);

impl<S> FromRequestParts<S> for Adapter
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        let token = parts
            .headers
            .get("X-Adapter-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::from(ClasperError::new(ErrorCode::MissingToken, "missing X-Adapter-Token")))?;
        let ctx = verify_adapter_token(
            token,
            &app.jwt,
            &app.config.local_tenant_id,
            app.config.local_workspace_id.as_deref(),
        )?;
        Ok(Self(ctx))
    }
}

/// A verified local operator (spec.md §6 `X-Ops-Api-Key`). An empty
/// configured key disables operator auth entirely (single-operator dev
/// mode).
pub struct Operator;

impl<S> FromRequestParts<S> for Operator
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        if app.config.ops_api_key.is_empty() {
            return Ok(Self);
        }
        let presented = parts.headers.get("X-Ops-Api-Key").and_then(|v| v.to_str().ok());
        match presented {
            Some(key) if key == app.config.ops_api_key => Ok(Self),
            _ => Err(ServerError::forbidden("missing or invalid X-Ops-Api-Key")),
        }
    }
}
