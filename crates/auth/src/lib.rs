//! Adapter Auth: mint/verify short-lived adapter tokens (spec.md §4.1).
//!
//! Tokens tie a caller to `(tenant, workspace, adapter, capabilities)` for a
//! bounded lifetime (default 2h, hard cap 2h). Verification is entirely
//! local: a shared secret and a symmetric algorithm (HS256 by default), no
//! external identity provider. This is deliberately "self-attested" per the
//! spec's Non-goals — there is no independent proof an adapter is who it
//! claims to be beyond holding the shared secret.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use clasper_core::error::{ClasperError, ErrorCode};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default/maximum adapter token lifetime: 2 hours.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

/// Errors produced while minting or verifying adapter tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented where one is required.
    #[error("missing token")]
    MissingToken,
    /// The token failed signature verification or carries a malformed shape.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// A required claim was absent or did not match local configuration.
    #[error("missing claim: {0}")]
    MissingClaim(String),
    /// Local configuration is invalid (e.g. unsupported algorithm, empty secret).
    #[error("config error: {0}")]
    ConfigError(String),
}

impl From<AuthError> for ClasperError {
    fn from(e: AuthError) -> Self {
        let code = match &e {
            AuthError::MissingToken => ErrorCode::MissingToken,
            AuthError::InvalidToken(_) => ErrorCode::InvalidToken,
            AuthError::MissingClaim(_) => ErrorCode::MissingClaim,
            AuthError::ConfigError(_) => ErrorCode::ConfigError,
        };
        ClasperError::new(code, e.to_string())
    }
}

/// Token kind embedded in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// A normal adapter token, scoped to one `adapter_id`.
    Adapter,
    /// A one-shot bootstrap token accepted only by `/adapters/register`.
    Bootstrap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdapterClaims {
    sub: String,
    #[serde(rename = "type")]
    typ: TokenType,
    adapter_id: Option<String>,
    tenant_id: String,
    workspace_id: Option<String>,
    #[serde(default)]
    allowed_capabilities: Vec<Value>,
    iat: i64,
    exp: i64,
}

/// Claims supplied by the caller when minting an adapter token.
#[derive(Debug, Clone)]
pub struct MintClaims {
    /// Adapter identifier the token speaks for.
    pub adapter_id: String,
    /// Tenant the token is scoped to.
    pub tenant_id: String,
    /// Workspace the token is scoped to, if the deployment configures one.
    pub workspace_id: Option<String>,
    /// Capabilities this token is allowed to exercise.
    pub allowed_capabilities: Vec<String>,
    /// Lifetime in seconds; clamped to `[1, DEFAULT_TOKEN_TTL_SECS]`.
    pub ttl_secs: i64,
}

/// Verified identity and scope extracted from an adapter token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    /// The adapter the token speaks for.
    pub adapter_id: String,
    /// Tenant the token is scoped to.
    pub tenant_id: String,
    /// Workspace the token is scoped to, if any.
    pub workspace_id: Option<String>,
    /// Capabilities the token grants. Non-string entries in the original
    /// claim are silently dropped (spec.md §4.1).
    pub allowed_capabilities: Vec<String>,
}

/// Local JWT configuration: the shared secret and signature algorithm.
#[derive(Clone)]
pub struct JwtConfig {
    secret: String,
    algorithm: Algorithm,
}

impl JwtConfig {
    /// Build a config from the shared secret and an algorithm name (as read
    /// from `ADAPTER_JWT_ALGORITHM`). Only `HS256` is supported; anything
    /// else is a fail-closed config error per spec.md §9.
    pub fn new(secret: impl Into<String>, algorithm_name: &str) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::ConfigError("ADAPTER_JWT_SECRET must not be empty".into()));
        }
        let algorithm = match algorithm_name {
            "HS256" => Algorithm::HS256,
            other => {
                return Err(AuthError::ConfigError(format!(
                    "unsupported ADAPTER_JWT_ALGORITHM '{other}'; only HS256 is supported"
                )))
            }
        };
        Ok(Self { secret, algorithm })
    }
}

/// Mint a signed adapter token from `claims`.
pub fn mint_adapter_token(cfg: &JwtConfig, claims: MintClaims) -> Result<String, AuthError> {
    let now = clasper_core::ids::now_ms() as i64 / 1000;
    let ttl = claims.ttl_secs.clamp(1, DEFAULT_TOKEN_TTL_SECS);
    let full = AdapterClaims {
        sub: format!("adapter:{}", claims.adapter_id),
        typ: TokenType::Adapter,
        adapter_id: Some(claims.adapter_id),
        tenant_id: claims.tenant_id,
        workspace_id: claims.workspace_id,
        allowed_capabilities: claims.allowed_capabilities.into_iter().map(Value::String).collect(),
        iat: now,
        exp: now + ttl,
    };
    encode(
        &Header::new(cfg.algorithm),
        &full,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(|e| AuthError::ConfigError(e.to_string()))
}

/// Mint a one-shot bootstrap token accepted only for first-time registration.
pub fn mint_bootstrap_token(cfg: &JwtConfig, tenant_id: &str) -> Result<String, AuthError> {
    let now = clasper_core::ids::now_ms() as i64 / 1000;
    let full = AdapterClaims {
        sub: "bootstrap".to_string(),
        typ: TokenType::Bootstrap,
        adapter_id: None,
        tenant_id: tenant_id.to_string(),
        workspace_id: None,
        allowed_capabilities: Vec::new(),
        iat: now,
        exp: now + DEFAULT_TOKEN_TTL_SECS,
    };
    encode(
        &Header::new(cfg.algorithm),
        &full,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(|e| AuthError::ConfigError(e.to_string()))
}

/// Verify an adapter token against local tenant/workspace configuration.
///
/// `local_workspace` is `None` when the deployment does not pin a single
/// workspace; in that case any `workspace_id` claim is accepted.
pub fn verify_adapter_token(
    token: &str,
    cfg: &JwtConfig,
    local_tenant: &str,
    local_workspace: Option<&str>,
) -> Result<AdapterContext, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    let mut validation = Validation::new(cfg.algorithm);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();
    let data = decode::<AdapterClaims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    let claims = data.claims;

    if claims.typ != TokenType::Adapter {
        return Err(AuthError::InvalidToken("expected adapter token".into()));
    }
    let adapter_id = claims.adapter_id.ok_or_else(|| AuthError::MissingClaim("adapter_id".into()))?;
    if adapter_id.trim().is_empty() {
        return Err(AuthError::MissingClaim("adapter_id".into()));
    }
    if claims.tenant_id.trim().is_empty() {
        return Err(AuthError::MissingClaim("tenant_id".into()));
    }
    if claims.tenant_id != local_tenant {
        return Err(AuthError::InvalidToken("tenant_id does not match local tenant".into()));
    }
    if let Some(required_ws) = local_workspace {
        match claims.workspace_id.as_deref() {
            Some(ws) if ws == required_ws => {}
            _ => return Err(AuthError::InvalidToken("workspace_id does not match local workspace".into())),
        }
    }
    let allowed_capabilities = claims
        .allowed_capabilities
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    Ok(AdapterContext {
        adapter_id,
        tenant_id: claims.tenant_id,
        workspace_id: claims.workspace_id,
        allowed_capabilities,
    })
}

/// Verify a bootstrap token, returning the tenant it was minted for.
pub fn verify_bootstrap_token(token: &str, cfg: &JwtConfig) -> Result<String, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    let mut validation = Validation::new(cfg.algorithm);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();
    let data = decode::<AdapterClaims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    if data.claims.typ != TokenType::Bootstrap {
        return Err(AuthError::InvalidToken("expected bootstrap token".into()));
    }
    Ok(data.claims.tenant_id)
}
