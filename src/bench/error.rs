//! Errors raised by the benchmark endpoints.

use serde::Serialize;
use thiserror::Error;

use crate::server::{HttpResponse, StatusCode};

/// A request the endpoints refuse with 400 Bad Request.
///
/// These never leave the handler: they are turned into a response with
/// [`BenchError::into_response`] and the connection carries on.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A path parameter is not a non-negative integer in the accepted range.
    /// `what` names the quantity, as in "Invalid size".
    #[error("Invalid {what}")]
    InvalidParameter {
        what: &'static str,
        value: String,
    },

    /// The request body is not valid JSON.
    #[error("{0}")]
    MalformedBody(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl BenchError {
    /// The 400 response for this error: plain text for bad parameters,
    /// `{"error": "..."}` for bad bodies.
    pub fn into_response(self) -> HttpResponse {
        let response = HttpResponse::new(StatusCode::BadRequest);

        match self {
            BenchError::InvalidParameter { .. } => response
                .with_content_type("text/plain; charset=utf-8")
                .with_body_string(self.to_string()),
            BenchError::MalformedBody(e) => {
                let body = ErrorBody { error: e.to_string() };
                // A struct of one string field always serializes
                let json = serde_json::to_vec(&body).unwrap_or_default();
                response
                    .with_content_type("application/json; charset=utf-8")
                    .with_body_bytes(json)
            }
        }
    }
}
