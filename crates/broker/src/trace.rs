//! W3C trace-context propagation through message headers.
//!
//! With the `otel` feature, publishers inject the current span's context
//! and consumers parent their `bus.consume` span on the context they find,
//! both through the global text map propagator. Without it both ends are
//! no-ops and headers pass through untouched.

use crate::headers::Headers;

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Writes the current span's context into `headers`.
#[cfg(feature = "otel")]
pub fn inject_current(headers: &mut Headers) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let cx = tracing::Span::current().context();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(headers));
    });
}

#[cfg(not(feature = "otel"))]
pub fn inject_current(_headers: &mut Headers) {}

/// Parents `span` on the context carried by `headers`, if any.
#[cfg(feature = "otel")]
pub fn set_parent(span: &tracing::Span, headers: &Headers) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(headers))
    });
    span.set_parent(parent);
}

#[cfg(not(feature = "otel"))]
pub fn set_parent(_span: &tracing::Span, _headers: &Headers) {}

/// Installs the W3C propagator and returns a layer that gives every
/// `tracing` span an OpenTelemetry span context.
///
/// Spans are not exported anywhere; the context only has to exist so it
/// can travel through message headers.
#[cfg(feature = "otel")]
pub fn otel_layer<S>(
    service_name: &'static str,
) -> tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;

    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );
    let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
    tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name))
}

/// Adapter to inject OTel context into message headers.
#[cfg(feature = "otel")]
struct HeaderInjector<'a>(&'a mut Headers);

#[cfg(feature = "otel")]
impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

/// Adapter to extract OTel context from message headers.
#[cfg(feature = "otel")]
struct HeaderExtractor<'a>(&'a Headers);

#[cfg(feature = "otel")]
impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get_str(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }
}
