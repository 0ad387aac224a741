//! HTTP request parsing and representation.

use std::collections::HashMap;
use serde::de::DeserializeOwned;

use crate::parser::decoder::RequestDecoder;
use crate::parser::error::Error;
use crate::parser::method::Method;
use crate::parser::version::HttpVersion;

/// Represents an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request path, without the query string
    pub path: String,
    /// The raw request target as sent on the request line
    pub target: String,
    /// The HTTP version
    pub version: HttpVersion,
    /// The HTTP headers
    pub headers: HashMap<String, String>,
    /// The request body, already de-chunked
    pub body: Vec<u8>,
    /// Query parameters parsed from the target
    pub query_params: HashMap<String, String>,
    /// Path parameters captured by the route pattern
    pub path_params: HashMap<String, String>,
}

impl HttpRequest {
    /// Create a new HTTP request with an empty body.
    ///
    /// The query string of `target` is split off into [`HttpRequest::query_params`].
    pub fn new(method: Method, target: String, version: HttpVersion, headers: HashMap<String, String>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query)),
            None => (target.clone(), None),
        };

        let query_params: HashMap<String, String> = query
            .map(|query| query
                .split('&')
                .filter(|s| !s.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (pair.to_string(), String::new()),
                })
                .collect())
            .unwrap_or_default();

        Self {
            method,
            path,
            target,
            version,
            headers,
            body: Vec::new(),
            query_params,
            path_params: HashMap::new(),
        }
    }

    /// Create a new HTTP request with a body.
    pub fn with_body(method: Method, target: String, version: HttpVersion, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        let mut request = Self::new(method, target, version, headers);
        request.body = body;
        request
    }

    /// Get a header value. Header names are matched case-insensitively.
    pub fn get_header(&self, name: &str) -> Option<&String> {
        find_header(&self.headers, name)
    }

    /// Check if a header exists.
    pub fn has_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    /// Deserialize the request body as JSON.
    ///
    /// The `Content-Type` header is not consulted; any body that parses is accepted.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Get a query parameter value.
    pub fn get_query_param(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Get a path parameter captured by the matching route, e.g. `ms` for `/delay/{ms}`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Whether the connection should stay open after this request is answered.
    pub fn keep_alive(&self) -> bool {
        let Some(connection) = self.get_header("Connection") else {
            return self.version.persistent_by_default();
        };

        let has_token = |token: &str| {
            connection
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        if has_token("close") {
            false
        } else if has_token("keep-alive") {
            true
        } else {
            self.version.persistent_by_default()
        }
    }
}

/// Parse a complete HTTP request from a byte slice.
///
/// Bytes following the request are ignored. Use [`RequestDecoder`] when
/// reading from a stream.
pub fn parse_request(input: &[u8]) -> Result<HttpRequest, Error> {
    if input.is_empty() {
        return Err(Error::EmptyRequest);
    }
    parse_frame(input).map(|(request, _)| request)
}

/// Parse one HTTP request from the front of `input`.
///
/// On success returns the request together with the number of bytes it
/// occupied, so that pipelined requests remain in the caller's buffer.
/// Returns [`Error::Incomplete`] when more bytes are needed.
pub fn parse_frame(input: &[u8]) -> Result<(HttpRequest, usize), Error> {
    RequestDecoder::new().decode(input)?.ok_or(Error::Incomplete)
}

/// Case-insensitive header lookup. Decoded requests hold one entry per name.
pub(crate) fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a String> {
    headers
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v))
}
