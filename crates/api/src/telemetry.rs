//! Request spans that continue the caller's W3C trace.

use axum::body::Body;
use axum::http::Request;
use tracing::Span;

/// Span for one HTTP request, parented on the caller's `traceparent` when
/// the `otel` feature is on.
pub fn request_span(request: &Request<Body>) -> Span {
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
    );

    #[cfg(feature = "otel")]
    extract_trace_context(request.headers(), &span);

    span
}

#[cfg(feature = "otel")]
fn extract_trace_context(headers: &axum::http::HeaderMap, span: &Span) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(headers))
    });
    span.set_parent(parent);
}

/// Adapter to extract OTel context from HTTP headers.
#[cfg(feature = "otel")]
struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

#[cfg(feature = "otel")]
impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}
