//! HTTP error responses
//!
//! Every failure is returned as `{"error": {"kind", "message", "code"?}}` with
//! a status code chosen from the error's variant.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gcodebridge_core::{ConnectionError, ControllerError, Error};
use serde::Serialize;

/// An error ready to be sent to an HTTP client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// Stable machine-readable identifier
    pub kind: &'static str,
    /// Human-readable description
    pub message: String,
    /// GRBL error or alarm code, when there is one
    pub code: Option<u8>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u8>,
}

impl ApiError {
    /// Build an error without a GRBL code
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// 400 for a malformed request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn with_code(mut self, code: u8) -> Self {
        self.code = Some(code);
        self
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Connection(e) => {
                let (status, kind) = match e {
                    ConnectionError::NotConnected => {
                        (StatusCode::SERVICE_UNAVAILABLE, "not_connected")
                    }
                    ConnectionError::ConnectionLost { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "connection_lost")
                    }
                    ConnectionError::AlreadyConnected { .. } => {
                        (StatusCode::CONFLICT, "already_connected")
                    }
                    ConnectionError::PortNotFound { .. } => {
                        (StatusCode::NOT_FOUND, "port_not_found")
                    }
                    ConnectionError::NoPortDetected => (StatusCode::NOT_FOUND, "no_port_detected"),
                    ConnectionError::InvalidParameters { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_parameters")
                    }
                    ConnectionError::FailedToOpen { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "failed_to_open")
                    }
                };
                Self::new(status, kind, message)
            }
            Error::Controller(e) => match e {
                ControllerError::CommandRejected { code, .. } => {
                    Self::new(StatusCode::UNPROCESSABLE_ENTITY, "command_rejected", message)
                        .with_code(code)
                }
                ControllerError::Alarm { code, .. } => {
                    Self::new(StatusCode::UNPROCESSABLE_ENTITY, "alarm", message).with_code(code)
                }
                ControllerError::Timeout { .. } => {
                    Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
                }
                ControllerError::InvalidCommand { .. } => {
                    Self::new(StatusCode::BAD_REQUEST, "invalid_command", message)
                }
                ControllerError::Busy { .. } => {
                    Self::new(StatusCode::TOO_MANY_REQUESTS, "busy", message)
                }
                ControllerError::Reset => {
                    Self::new(StatusCode::CONFLICT, "controller_reset", message)
                }
            },
            Error::Io(_) | Error::Other(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} ({}): {}", self.status, self.kind, self.message);
        } else {
            tracing::debug!("{} ({}): {}", self.status, self.kind, self.message);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind,
                message: &self.message,
                code: self.code,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
