//! The `{error, code}` envelope (spec.md §7) every handler returns on failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use clasper_auth::AuthError;
use clasper_core::error::{ClasperError, ErrorCode};
use clasper_ledger::LedgerError;
use clasper_policy::PolicyError;

/// A handler-level failure, rendered as spec §7's `{error, code}` body.
#[derive(Debug)]
pub struct ServerError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ServerError {
    /// Build a `400 validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: ErrorCode::Validation, message: message.into() }
    }

    /// Build a `400 wizard_allow_ack_required` error.
    #[must_use]
    pub fn wizard_ack_required(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: ErrorCode::WizardAckRequired, message: message.into() }
    }

    /// Build a `404 not found`, reported under `ErrorCode::Validation`
    /// (spec §7 does not define a distinct not-found taxonomy entry).
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: ErrorCode::Validation, message: message.into() }
    }

    /// Build a `403` forbidden error (operator auth failure).
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self { status: StatusCode::FORBIDDEN, code: ErrorCode::InvalidToken, message: message.into() }
    }
}

impl From<ClasperError> for ServerError {
    fn from(e: ClasperError) -> Self {
        let status = match e.code {
            ErrorCode::MissingToken | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::MissingClaim | ErrorCode::ConfigError => StatusCode::FORBIDDEN,
            ErrorCode::Validation | ErrorCode::WizardAckRequired => StatusCode::BAD_REQUEST,
            ErrorCode::PolicyDenied => StatusCode::FORBIDDEN,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code: e.code, message: e.message }
    }
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ClasperError::from(e).into()
    }
}

impl From<LedgerError> for ServerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => Self::not_found(format!("decision not found: {id}")),
            LedgerError::JustificationTooShort => Self::validation(e.to_string()),
        }
    }
}

impl From<PolicyError> for ServerError {
    fn from(e: PolicyError) -> Self {
        Self::validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.message, code: self.code.as_str() };
        (self.status, Json(body)).into_response()
    }
}
