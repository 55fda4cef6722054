// SPDX-License-Identifier: MIT

use crate::response::Response;
use serde_json::json;
use thiserror::Error;

/// Message used for every 5xx envelope; details only travel in the debug block.
pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred while processing your request.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bad request")]
    BadRequest,
    #[error("Request body too large. Maximum allowed size: {0} bytes")]
    PayloadTooLarge(u64),
    #[error("Invalid multipart data: {0}")]
    InvalidMultipart(String),
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Route not found: {0}")]
    RouteNotFound(String),
    #[error("Invalid route pattern '{template}': {reason}")]
    InvalidPattern { template: String, reason: String },
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Upstream service error: {0}")]
    Upstream(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        AppError::Upstream(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        AppError::Database(msg.into())
    }

    pub fn invalid_multipart<S: Into<String>>(msg: S) -> Self {
        AppError::InvalidMultipart(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        AppError::Internal(msg.into())
    }

    /// HTTP status used when this error reaches the outer boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest | AppError::InvalidMultipart(_) => 400,
            AppError::UnsupportedMethod(_) => 405,
            AppError::PayloadTooLarge(_) => 413,
            AppError::Upstream(_) => 502,
            _ => 500,
        }
    }

    /// Short machine-readable name, used in debug envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Io(_) => "io",
            AppError::Glob(_) => "glob",
            AppError::Json(_) => "json",
            AppError::BadRequest => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::InvalidMultipart(_) => "invalid_multipart",
            AppError::UnsupportedMethod(_) => "unsupported_method",
            AppError::RouteNotFound(_) => "route_not_found",
            AppError::InvalidPattern { .. } => "invalid_pattern",
            AppError::Configuration(_) => "configuration",
            AppError::Upstream(_) => "upstream",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Converts the error into the JSON envelope sent to the client.
    ///
    /// Client errors keep their own message. Everything else is reported with
    /// the generic failure message, plus a `debug` object when `debug` is set.
    pub fn to_response(&self, debug: bool) -> Response {
        let status = self.status_code();
        let mut response = Response::new();

        if self.is_client_error() {
            response.error(self.to_string(), status, None);
            return response;
        }

        let mut body = json!({
            "status_code": status,
            "message": GENERIC_FAILURE_MESSAGE,
        });
        if debug {
            body["debug"] = json!({
                "message": self.to_string(),
                "kind": self.kind(),
            });
        }
        response.set_status_code(status);
        response.json(body);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = [
            AppError::PayloadTooLarge(1024),
            AppError::RouteNotFound("user.show".into()),
            AppError::configuration("unknown middleware 'audit'"),
            AppError::upstream("connection refused"),
        ];

        let expected = [
            "Request body too large. Maximum allowed size: 1024 bytes",
            "Route not found: user.show",
            "Invalid configuration: unknown middleware 'audit'",
            "Upstream service error: connection refused",
        ];

        for (error, expected) in errors.iter().zip(expected.iter()) {
            assert_eq!(error.to_string(), *expected);
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::BadRequest.status_code(), 400);
        assert_eq!(AppError::PayloadTooLarge(1).status_code(), 413);
        assert_eq!(AppError::upstream("x").status_code(), 502);
        assert_eq!(AppError::database("x").status_code(), 500);
        assert!(AppError::UnsupportedMethod("TRACE".into()).is_client_error());
        assert!(!AppError::internal("boom").is_client_error());
    }

    #[test]
    fn test_server_error_envelope_hides_details_without_debug() {
        let response = AppError::database("table missing").to_response(false);
        assert_eq!(response.status_code(), 500);
        let body = response.json_body().unwrap();
        assert_eq!(body["message"], GENERIC_FAILURE_MESSAGE);
        assert!(body.get("debug").is_none());
    }

    #[test]
    fn test_server_error_envelope_with_debug() {
        let response = AppError::database("table missing").to_response(true);
        let body = response.json_body().unwrap();
        assert_eq!(body["status_code"], 500);
        assert_eq!(body["debug"]["kind"], "database");
        assert_eq!(body["debug"]["message"], "Database error: table missing");
    }

    #[test]
    fn test_client_error_envelope_keeps_message() {
        let response = AppError::BadRequest.to_response(true);
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.envelope_message().as_deref(), Some("Bad request"));
    }
}
