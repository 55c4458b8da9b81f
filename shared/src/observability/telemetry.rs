use anyhow::Result;

use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_appender_tracing::layer;
use opentelemetry_aws::detector::LambdaResourceDetector;
use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter};
use opentelemetry_resource_detectors::{OsResourceDetector, ProcessResourceDetector};
use opentelemetry_sdk::{
    logs::SdkLoggerProvider,
    metrics::SdkMeterProvider,
    propagation::TraceContextPropagator,
    resource::ResourceDetector,
    trace::{RandomIdGenerator, SdkTracerProvider},
    Resource,
};
use tracing::Level;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_SERVICE_NAME: &str = "create-record";

// Resource attributes shared by traces, metrics and logs: the SDK defaults
// (env, telemetry sdk) plus whatever the Lambda, OS and process detectors find.
fn detect_resource() -> Resource {
    let detectors: [Box<dyn ResourceDetector>; 3] = [
        Box::new(LambdaResourceDetector {}),
        Box::new(OsResourceDetector),
        Box::new(ProcessResourceDetector),
    ];

    Resource::builder()
        .with_service_name(
            std::env::var("OTEL_SERVICE_NAME").unwrap_or(DEFAULT_SERVICE_NAME.to_string()),
        )
        .with_detectors(&detectors)
        .build()
}

fn init_tracer(resource: Resource) -> Result<SdkTracerProvider> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = SpanExporter::builder().with_tonic().build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_id_generator(RandomIdGenerator::default())
        .with_batch_exporter(exporter)
        .build();

    Ok(tracer_provider)
}

fn init_meter_provider(resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder().with_tonic().build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(meter_provider)
}

// Simple exporter: log records must leave before the execution environment
// is frozen.
fn init_logger_provider(resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder().with_tonic().build()?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build();

    Ok(logger_provider)
}

/// Installs the global `tracing` subscriber: stdout formatting for the
/// platform log stream, and OTLP export of spans, metrics and log events.
pub fn init_otel() -> Result<OtelGuard> {
    let resource = detect_resource();
    let logger = init_logger_provider(resource.clone())?;
    let trace_provider = init_tracer(resource.clone())?;
    let meter = init_meter_provider(resource)?;

    let tracer = trace_provider.tracer("create-record");

    let filter_otel = EnvFilter::new("info")
        .add_directive("hyper=off".parse()?)
        .add_directive("opentelemetry=off".parse()?)
        .add_directive("tonic=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?);
    let otel_layer = layer::OpenTelemetryTracingBridge::new(&logger).with_filter(filter_otel);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            Level::INFO,
        ))
        .with(fmt_layer)
        .with(otel_layer)
        .with(MetricsLayer::new(meter.clone()))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;

    Ok(OtelGuard {
        tracer_provider: trace_provider,
        meter_provider: meter,
        logger_provider: logger,
    })
}

/// Owns the telemetry providers. Flush after each invocation; dropping the
/// guard shuts the providers down.
pub struct OtelGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
}

impl OtelGuard {
    pub fn flush(&self) {
        if let Err(err) = self.tracer_provider.force_flush() {
            eprintln!("{err:?}");
        }
        if let Err(err) = self.meter_provider.force_flush() {
            eprintln!("{err:?}");
        }
        if let Err(err) = self.logger_provider.force_flush() {
            eprintln!("{err:?}");
        }
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(err) = self.tracer_provider.shutdown() {
            eprintln!("{err:?}");
        }
        if let Err(err) = self.meter_provider.shutdown() {
            eprintln!("{err:?}");
        }
        if let Err(err) = self.logger_provider.shutdown() {
            eprintln!("{err:?}");
        }
    }
}
