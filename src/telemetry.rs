use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "desugar";
const DEFAULT_LOG_FILTER: &str = "desugar=info,warn";
const TRACES_PATH: &str = "/v1/traces";

/// Spans of one desugar run, exported over OTLP/HTTP.
///
/// The run, each archive phase and each class get a span; classes are
/// rewritten on rayon workers and parent their spans explicitly.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    pub(crate) fn new(endpoint: &str) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(trace_endpoint(endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Ok(Self::with_exporter(exporter))
    }

    fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(16_384)
            .with_max_export_batch_size(1024)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build(),
            )
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Self { tracer, provider }
    }

    /// Flushes pending spans.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to flush run spans: {err}"))
    }

    fn phase<T>(&self, name: &str, attributes: &[KeyValue], f: impl FnOnce() -> T) -> T {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    fn class<T>(&self, entry: &str, parent_cx: &OtelContext, f: impl FnOnce() -> T) -> T {
        let mut span = self
            .tracer
            .start_with_context("class.desugar", parent_cx);
        span.set_attribute(KeyValue::new("desugar.entry", entry.to_string()));
        let _guard = parent_cx.with_span(span).attach();
        f()
    }
}

/// Collector URL to the OTLP/HTTP traces path; a bare host gets `/v1/traces`.
fn trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    if !url.path().ends_with(TRACES_PATH) {
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{TRACES_PATH}"));
    }
    Ok(url.to_string())
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Runs `f` inside a run or phase span when tracing is on.
pub(crate) fn with_span<T>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: impl FnOnce() -> T,
) -> T {
    match telemetry {
        Some(telemetry) => telemetry.phase(name, attributes, f),
        None => f(),
    }
}

/// Runs `f` inside a per-class span parented to `parent_cx`.
pub(crate) fn with_class_span<T>(
    telemetry: Option<&Telemetry>,
    entry: &str,
    parent_cx: &OtelContext,
    f: impl FnOnce() -> T,
) -> T {
    match telemetry {
        Some(telemetry) => telemetry.class(entry, parent_cx, f),
        None => f(),
    }
}

/// Marks the current class span with a nest host missing from the archive.
pub(crate) fn record_unresolved_nest_host(class: &str, host: &str) {
    let cx = OtelContext::current();
    let span = cx.span();
    if span.span_context().is_valid() {
        span.add_event(
            "desugar.unresolved_nest_host",
            vec![
                KeyValue::new("desugar.class", class.to_string()),
                KeyValue::new("desugar.nest_host", host.to_string()),
            ],
        );
    }
}
