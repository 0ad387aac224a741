//! Handlers for the benchmark endpoints.

use std::time::Duration;
use log::debug;
use serde_json::Value;

use crate::bench::error::BenchError;
use crate::parser::HttpRequest;
use crate::server::{Error, HttpResponse, StatusCode};

/// `GET /ping`
pub async fn ping(_request: HttpRequest) -> Result<HttpResponse, Error> {
    Ok(text(StatusCode::Ok, "OK"))
}

/// `GET /delay/{ms}`: answers after sleeping `ms` milliseconds.
///
/// Only this request's task waits; the timer does not hold a worker thread.
pub async fn delay(request: HttpRequest) -> Result<HttpResponse, Error> {
    let ms = match parse_param(&request, "ms", "delay") {
        Ok(ms) => ms,
        Err(e) => return Ok(reject(e)),
    };

    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(text(StatusCode::Ok, "Delayed response"))
}

/// `GET /size/{kb}`: answers with `kb * 1024` zero bytes.
///
/// Sizes above `max_kb` are refused like malformed ones.
pub async fn size(request: HttpRequest, max_kb: u64) -> Result<HttpResponse, Error> {
    let len = parse_param(&request, "kb", "size").and_then(|kb| payload_len(kb, max_kb));
    let len = match len {
        Ok(len) => len,
        Err(e) => return Ok(reject(e)),
    };

    Ok(HttpResponse::new(StatusCode::Ok)
        .with_content_type("application/octet-stream")
        .with_body_bytes(vec![0u8; len]))
}

/// `POST /echo`: answers with the request's JSON body, re-serialized.
pub async fn echo(request: HttpRequest) -> Result<HttpResponse, Error> {
    let value: Value = match serde_json::from_slice(&request.body) {
        Ok(value) => value,
        Err(e) => return Ok(reject(BenchError::MalformedBody(e))),
    };

    HttpResponse::new(StatusCode::Ok).with_json(&value)
}

fn text(status: StatusCode, body: &str) -> HttpResponse {
    HttpResponse::new(status)
        .with_content_type("text/plain; charset=utf-8")
        .with_body_string(body)
}

fn reject(error: BenchError) -> HttpResponse {
    debug!("Rejecting request: {error:?}");
    error.into_response()
}

/// Parse the path parameter `name` as a non-negative integer.
fn parse_param(request: &HttpRequest, name: &str, what: &'static str) -> Result<u64, BenchError> {
    let raw = request.param(name).unwrap_or_default();
    raw.parse::<u64>().map_err(|_| BenchError::InvalidParameter {
        what,
        value: raw.to_string(),
    })
}

/// Byte length of a `kb` kilobyte payload, bounded by `max_kb`.
fn payload_len(kb: u64, max_kb: u64) -> Result<usize, BenchError> {
    let invalid = || BenchError::InvalidParameter {
        what: "size",
        value: kb.to_string(),
    };

    if kb > max_kb {
        return Err(invalid());
    }
    kb.checked_mul(1024)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or_else(invalid)
}
