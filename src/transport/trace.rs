//! Tracing functionality for outbound HTTP calls.
//!
//! Every instrumented call runs inside an `outbound` span; the status code or
//! the error is recorded on it once the call resolves.

use tracing::field::Empty;
use tracing::Span;

pub const ATTR_HTTP_METHOD_KEY: &str = "http.method";
pub const ATTR_HTTP_URL_KEY: &str = "http.url";
pub const ATTR_HTTP_STATUS_CODE_KEY: &str = "http.status_code";
pub const ATTR_ERROR_KEY: &str = "error";

/// Creates a new span for an outbound request (client-side span).
pub fn start_call_span(method: &str, url: &str) -> Span {
    tracing::info_span!(
        "outbound",
        http.method = method,
        http.url = url,
        http.status_code = Empty,
        error = Empty,
    )
}

/// Records the HTTP response status in the span.
pub fn record_response_in_span(span: &Span, status_code: u16) {
    span.record(ATTR_HTTP_STATUS_CODE_KEY, status_code);
}

/// Records an error in the span.
pub fn record_error_in_span(span: &Span, err: &dyn std::error::Error) {
    span.record(ATTR_ERROR_KEY, true);
    tracing::debug!(parent: span, error = %err, "outbound error");
}
