//! Subscriber setup: fmt output (pretty or JSON), an env filter that always
//! lets audit events through, and an OTLP span exporter when one is
//! configured through the standard `OTEL_*` variables.

use super::commands::logging::{LogFormat, Options};
use anyhow::{anyhow, Result};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    service_name: String,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` unless an exporter endpoint is set. Only the gRPC protocol is
    /// supported; `OTEL_EXPORTER_OTLP_PROTOCOL` is not consulted.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|ep| !ep.trim().is_empty())?;
        Some(Self {
            endpoint: normalize_endpoint(&endpoint),
            headers: lookup("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
            service_name: lookup("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            instance_id: lookup("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|| Ulid::new().to_string()),
        })
    }

    fn from_env() -> Option<Self> {
        Self::from_lookup(|key| var(key).ok())
    }

    /// Collector headers as gRPC metadata; ASCII values only.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut meta = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = key.to_ascii_lowercase();
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid OTLP header name {name}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid OTLP header value for {name}: {e}"))?;
            meta.insert(key, value);
        }
        Ok(meta)
    }
}

/// `k1=v1,k2=v2`; pairs without `=` or with an empty key are skipped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Collectors are reached over TLS unless a scheme says otherwise.
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_timeout(EXPORT_TIMEOUT);
    if !settings.headers.is_empty() {
        builder = builder.with_metadata(settings.metadata()?);
    }
    let exporter = builder.build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", settings.service_name.clone()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", settings.instance_id.clone()),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// `RUST_LOG` refines the level from `-v`; audit events are kept at any
/// verbosity.
fn filter(level: Option<Level>) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("audit=info".parse()?)
        .add_directive("hyper=error".parse()?)
        .add_directive("h2=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed
pub fn init(options: &Options) -> Result<()> {
    let (pretty, json) = match options.format {
        LogFormat::Pretty => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_current_span(true).with_span_list(false)),
        ),
    };

    let otel = match OtlpSettings::from_env() {
        Some(settings) => Some(tracing_opentelemetry::layer().with_tracer(tracer(&settings)?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(filter(options.level)?)
        .with(pretty)
        .with(json)
        .with(otel);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans; a no-op when no exporter was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Option<OtlpSettings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        OtlpSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn exporter_is_off_without_endpoint() {
        assert!(settings(&[]).is_none());
        assert!(settings(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")]).is_none());
    }

    #[test]
    fn settings_fill_service_identity() {
        let otlp = settings(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4317/"),
            ("OTEL_SERVICE_INSTANCE_ID", "pod-1"),
        ])
        .expect("settings");
        assert_eq!(otlp.endpoint, "https://collector:4317");
        assert_eq!(otlp.service_name, "sessiond");
        assert_eq!(otlp.instance_id, "pod-1");
        assert!(otlp.headers.is_empty());

        let otlp = settings(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_SERVICE_NAME", "sessiond-eu"),
        ])
        .expect("settings");
        assert_eq!(otlp.endpoint, "http://localhost:4317");
        assert_eq!(otlp.service_name, "sessiond-eu");
        assert!(!otlp.instance_id.is_empty());
    }

    #[test]
    fn headers_skip_malformed_pairs() {
        assert_eq!(
            parse_headers(" authorization = Bearer t , broken, =x ,x-team=ops"),
            vec![
                ("authorization".to_string(), "Bearer t".to_string()),
                ("x-team".to_string(), "ops".to_string()),
            ]
        );
        assert!(parse_headers("").is_empty());
    }

    #[test]
    fn metadata_lowercases_keys_and_rejects_bad_names() {
        let otlp = settings(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "X-Tenant=ops,authorization=Bearer t"),
        ])
        .expect("settings");
        let metadata = otlp.metadata().expect("metadata");
        assert_eq!(metadata.len(), 2);
        assert!(metadata.get("x-tenant").is_some());

        let otlp = settings(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "bad key=v"),
        ])
        .expect("settings");
        assert!(otlp.metadata().is_err());
    }

    #[test]
    fn filter_accepts_every_level() {
        for level in [None, Some(Level::WARN), Some(Level::TRACE)] {
            assert!(filter(level).is_ok());
        }
    }
}
