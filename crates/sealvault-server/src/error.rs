//! Vault errors as HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sealvault::{Cause, ErrorKind, Operation, Stage, VaultError};

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl ApiError {
    pub fn invalid_input(operation: Operation, message: impl Into<String>) -> Self {
        Self(VaultError::new(operation, Cause::InvalidInput(message.into())))
    }

    pub fn not_found(operation: Operation, message: impl Into<String>) -> Self {
        Self(VaultError::new(operation, Cause::NotFound(message.into())))
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.0.kind())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::LedgerUnavailable | ErrorKind::Io => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Crypto | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request refused");
        }
        let body = ErrorBody {
            operation: self.0.operation,
            stage: self.0.stage,
            kind: self.0.kind(),
            message: self.0.cause.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Unwrap a JSON body, reporting a malformed one against `operation`.
pub fn json_body<T>(operation: Operation, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid_input(operation, rejection.body_text()))
}
