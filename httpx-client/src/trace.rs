//! Distributed tracing stage.
//!
//! Opens a `tracing` span per attempt and propagates W3C trace context
//! through the `traceparent` header.

use crate::middleware::{Middleware, Next};
use crate::{Request, Response, Result};
use async_trait::async_trait;
use http::HeaderValue;
use std::fmt;
use tracing::{Instrument, field, info_span};

/// W3C trace context header name.
pub const TRACE_PARENT: &str = "traceparent";

/// A parsed `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    /// 32 hex digit trace id.
    pub trace_id: String,
    /// 16 hex digit parent span id.
    pub span_id: String,
    /// Whether the trace is sampled.
    pub sampled: bool,
}

impl TraceParent {
    /// Start a new sampled trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: format!("{:032x}", rand::random::<u128>().max(1)),
            span_id: new_span_id(),
            sampled: true,
        }
    }

    /// Parse a version 00 header value.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }

        let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
        if !is_hex(parts[1], 32) || !is_hex(parts[2], 16) || !is_hex(parts[3], 2) {
            return None;
        }
        if parts[1].chars().all(|c| c == '0') || parts[2].chars().all(|c| c == '0') {
            return None;
        }

        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        Some(Self {
            trace_id: parts[1].to_lowercase(),
            span_id: parts[2].to_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// The same trace with a fresh span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            sampled: self.sampled,
        }
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = if self.sampled { "01" } else { "00" };
        write!(f, "00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }
}

fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>().max(1))
}

/// Wraps every attempt in an `HTTP <METHOD>` span.
///
/// An incoming `traceparent` is continued with a new span id; otherwise a new
/// trace is started. The span records the status code and marks transport
/// errors and 5xx responses as errors.
#[derive(Debug, Clone)]
pub struct TracingMiddleware {
    propagate: bool,
}

impl TracingMiddleware {
    /// Trace and propagate context.
    pub fn new() -> Self {
        Self { propagate: true }
    }

    /// Record spans without sending `traceparent`.
    pub fn without_propagation() -> Self {
        Self { propagate: false }
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        let context = match request.header(TRACE_PARENT).and_then(TraceParent::parse) {
            Some(parent) => parent.child(),
            None => TraceParent::new_root(),
        };

        let span = info_span!(
            "http.client",
            otel.name = %format!("HTTP {}", request.method()),
            otel.kind = "client",
            otel.status_code = field::Empty,
            http.method = %request.method(),
            http.url = %request.url(),
            http.status_code = field::Empty,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
            error = field::Empty,
        );

        if self.propagate
            && let Ok(value) = HeaderValue::try_from(context.to_string())
        {
            request.headers_mut().insert(TRACE_PARENT, value);
        }

        let outcome = next.run(request).instrument(span.clone()).await;

        match &outcome {
            Ok(response) => {
                span.record("http.status_code", response.status_code());
                if response.is_server_error() {
                    span.record("otel.status_code", "ERROR");
                }
            }
            Err(e) => {
                span.record("otel.status_code", "ERROR");
                span.record("error", field::display(e));
            }
        }

        outcome
    }
}
