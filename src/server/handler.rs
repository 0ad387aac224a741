//! HTTP request handlers and routing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::parser::{HttpRequest, Method};
use crate::server::{HttpResponse, Error};

/// Type alias for a boxed future that returns a Result<HttpResponse, Error>.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for a handler function that takes an HttpRequest and returns a HandlerFuture.
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A route path such as `/delay/{ms}`.
///
/// Each `{name}` segment captures exactly one non-empty path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern string.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = split_segments(&raw)
            .map(|segment| {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                }
            })
            .collect();

        Self { raw, segments }
    }

    /// The pattern as it was registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `path` against the pattern, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_segments(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Param(name) if !part.is_empty() => {
                    params.insert(name.clone(), part.to_string());
                }
                _ => return None,
            }
        }

        // Trailing segments mean the path is longer than the pattern
        parts.next().is_none().then_some(params)
    }
}

fn split_segments(path: &str) -> std::str::Split<'_, char> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

/// Represents a route in the HTTP server.
pub struct Route {
    /// The path pattern to match.
    pub path: PathPattern,
    /// The HTTP methods to match.
    pub methods: Vec<Method>,
    /// The handler function.
    pub handler: HandlerFn,
}
