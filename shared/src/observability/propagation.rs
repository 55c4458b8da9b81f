use opentelemetry::trace::TraceContextExt;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Renders the span's OpenTelemetry context as a W3C `traceparent` value,
/// or `None` when the span is not being recorded by an OpenTelemetry layer.
pub fn current_traceparent(span: &tracing::Span) -> Option<String> {
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return None;
    }

    Some(format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    ))
}

#[cfg(test)]
mod tests {
    use super::current_traceparent;

    #[test]
    fn when_no_otel_layer_is_installed_should_return_none() {
        let span = tracing::info_span!("outbound");

        assert!(current_traceparent(&span).is_none());
    }
}
