//! Error types for the HTTP server.

use thiserror::Error;

use crate::parser::{Error as ParserError, Method};
use crate::server::response::{HttpResponse, StatusCode};

/// Errors that can occur during HTTP server operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing an HTTP request.
    #[error("Parse error: {0}")]
    ParseError(#[from] ParserError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Method not allowed for the requested resource. Carries the allowed methods.
    #[error("Method {0} not allowed for path: {1}")]
    MethodNotAllowed(Method, String, Vec<Method>),

    /// The request grew past the configured size limit.
    #[error("Request exceeds {0} bytes")]
    RequestTooLarge(usize),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    InternalError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// The status code this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::ParseError(_) => StatusCode::BadRequest,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::MethodNotAllowed(..) => StatusCode::MethodNotAllowed,
            Error::RequestTooLarge(_) => StatusCode::PayloadTooLarge,
            Error::IoError(_) | Error::InternalError(_) | Error::JsonError(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    /// Build the plain-text response sent to the client for this error.
    pub fn to_response(&self) -> HttpResponse {
        let response = HttpResponse::new(self.status()).with_content_type("text/plain; charset=utf-8");

        let response = match self {
            Error::MethodNotAllowed(_, _, allowed) => {
                let allowed = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                response.with_header("Allow", allowed)
            }
            _ => response,
        };

        response.with_body_string(self.to_string())
    }
}
