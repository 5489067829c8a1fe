//! Actix Web error adapters for service-host errors.
//!
//! This module provides implementations of Actix Web error traits
//! for the library error types, allowing them to be used in Actix Web handlers.

use crate::error::Error;
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

fn error_body(message: String, status_code: StatusCode) -> HttpResponse {
    HttpResponse::build(status_code)
        .content_type("application/json")
        .json(json!({
            "error": message,
            "code": status_code.as_u16()
        }))
}

// Implement ResponseError for our Error type
impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        error_body(self.to_string(), self.status_code())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            Error::UnknownService(_) => StatusCode::NOT_FOUND,
            Error::UnknownOperation { .. } => StatusCode::NOT_FOUND,
            Error::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::Configuration { .. } => StatusCode::BAD_REQUEST,
            Error::ConfigParse(_) => StatusCode::BAD_REQUEST,
            Error::ConfigValidation(_) => StatusCode::BAD_REQUEST,
            Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised by the HTTP layer itself
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any library error
    #[error(transparent)]
    Service(#[from] Error),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        error_body(self.to_string(), self.status_code())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(e) => e.status_code(),
        }
    }
}
