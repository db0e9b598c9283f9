//! Process-wide tracing for a Courier endpoint host.
//!
//! # Usage
//!
//! ```no_run
//! use courier_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! // Human-readable logs for the Sales endpoint
//! init_tracing(&TracingOptions::new("Sales")).unwrap();
//! ```
//!
//! Hosts that ship logs to a collector use `.json()`; `.export_spans()`
//! additionally bridges spans to OpenTelemetry through a stdout exporter.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set. Pipeline plumbing logs at
/// `debug`, so the default keeps lifecycle, retry and fault events only.
const DEFAULT_FILTER: &str = "info";

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How the host process wants its diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingOptions {
    /// Endpoint name; used as the tracer name for exported spans.
    pub endpoint: String,
    /// One JSON object per line instead of text.
    pub json: bool,
    /// Bridge spans to OpenTelemetry.
    pub export_spans: bool,
}

impl TracingOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            json: false,
            export_spans: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn export_spans(mut self) -> Self {
        self.export_spans = true;
        self
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global tracing subscriber for an endpoint host.
///
/// Receive and dispatch spans close with their timing, so each processed
/// message yields one line carrying its queue and message id.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let text = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let json = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE)
    });
    let otel = options.export_spans.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(options.endpoint.clone());
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(text)
        .with(json)
        .with(otel)
        .try_init()?;

    tracing::info!(
        endpoint = %options.endpoint,
        json = options.json,
        export_spans = options.export_spans,
        "tracing initialized"
    );
    Ok(())
}

/// Install a compact subscriber for tests, writing through the test harness.
/// Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}

/// Flush exported spans. A no-op when spans were not exported.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_text_without_export() {
        let options = TracingOptions::new("Sales");
        assert!(!options.json);
        assert!(!options.export_spans);

        let options = options.json().export_spans();
        assert_eq!(options.endpoint, "Sales");
        assert!(options.json && options.export_spans);
    }

    #[test]
    fn second_install_is_rejected() {
        let options = TracingOptions::new("Sales").json();
        let _ = init_tracing(&options);
        assert!(init_tracing(&options).is_err());
    }

    #[test]
    fn test_tracing_can_be_initialized_twice() {
        init_test_tracing();
        init_test_tracing();
        tracing::info!("subscriber installed");
    }

    #[test]
    fn shutdown_without_export_is_a_noop() {
        shutdown_tracing();
    }
}
