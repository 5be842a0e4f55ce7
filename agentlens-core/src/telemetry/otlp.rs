//! OTLP (OpenTelemetry Protocol) export for enrichment spans.
//!
//! Converts [`TelemetrySpan`] batches to OTLP protobuf and POSTs them to a
//! collector's `/v1/traces` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};
use prost::Message;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::exporter::SpanExporter;
use super::span::{AttributeValue, Attributes, SpanKind, SpanStatus, TelemetrySpan};

const INSTRUMENTATION_SCOPE_NAME: &str = "agentlens.enrichment";

/// Sends spans to an OTLP/HTTP collector.
#[derive(Debug, Clone)]
pub struct OtlpHttpExporter {
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
    resource: Vec<KeyValue>,
}

impl OtlpHttpExporter {
    /// `url` is the full traces URL (`.../v1/traces`).
    pub fn new(
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OTLP HTTP client")?;
        Ok(Self {
            url: url.into(),
            headers,
            client,
            resource: resource_attributes("agent-orchestrator", None, &BTreeMap::new()),
        })
    }

    /// Set the resource attributes reported with every export.
    pub fn with_resource(
        mut self,
        service_name: &str,
        service_version: Option<&str>,
        extra: &BTreeMap<String, String>,
    ) -> Self {
        self.resource = resource_attributes(service_name, service_version, extra);
        self
    }

    /// Convert a batch to an OTLP ExportTraceServiceRequest.
    pub fn to_export_request(&self, spans: &[TelemetrySpan]) -> ExportTraceServiceRequest {
        let scope_spans = ScopeSpans {
            scope: Some(InstrumentationScope {
                name: INSTRUMENTATION_SCOPE_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            }),
            spans: spans.iter().map(to_otlp_span).collect(),
            ..Default::default()
        };

        let resource_spans = ResourceSpans {
            resource: Some(Resource {
                attributes: self.resource.clone(),
                ..Default::default()
            }),
            scope_spans: vec![scope_spans],
            ..Default::default()
        };

        ExportTraceServiceRequest {
            resource_spans: vec![resource_spans],
        }
    }
}

#[async_trait]
impl SpanExporter for OtlpHttpExporter {
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()> {
        let payload = self.to_export_request(batch).encode_to_vec();
        debug!("Exporting {} spans to {}", batch.len(), self.url);

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-protobuf");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(payload)
            .send()
            .await
            .context("Failed to send OTLP export request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OTLP export failed: {} - {}", status, body);
            anyhow::bail!("OTLP export failed with status {}", status);
        }

        Ok(())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

fn resource_attributes(
    service_name: &str,
    service_version: Option<&str>,
    extra: &BTreeMap<String, String>,
) -> Vec<KeyValue> {
    let mut attributes = vec![kv_string("service.name", service_name)];
    if let Some(version) = service_version {
        attributes.push(kv_string("service.version", version));
    }
    attributes.push(kv_string("telemetry.sdk.name", "agentlens"));
    attributes.push(kv_string("telemetry.sdk.language", "rust"));
    attributes.push(kv_string("telemetry.sdk.version", env!("CARGO_PKG_VERSION")));
    for (key, value) in extra {
        if key != "service.name" && key != "service.version" {
            attributes.push(kv_string(key, value));
        }
    }
    attributes
}

fn to_otlp_span(s: &TelemetrySpan) -> Span {
    let kind = match s.kind() {
        SpanKind::Internal => span::SpanKind::Internal,
        SpanKind::Server => span::SpanKind::Server,
        SpanKind::Client => span::SpanKind::Client,
    };
    let status = match s.status() {
        SpanStatus::Unset => Status {
            code: status::StatusCode::Unset as i32,
            message: String::new(),
        },
        SpanStatus::Ok => Status {
            code: status::StatusCode::Ok as i32,
            message: String::new(),
        },
        SpanStatus::Error { message } => Status {
            code: status::StatusCode::Error as i32,
            message: message.clone(),
        },
    };

    Span {
        trace_id: s.trace_id().to_bytes().to_vec(),
        span_id: s.span_id().to_bytes().to_vec(),
        parent_span_id: s
            .parent_span_id()
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default(), // Root span has no parent
        flags: u32::from(s.is_sampled()),
        name: s.name().to_string(),
        kind: kind as i32,
        start_time_unix_nano: s.start_time_unix_nano(),
        end_time_unix_nano: s.end_time_unix_nano(),
        attributes: to_key_values(s.attributes()),
        events: s
            .events()
            .iter()
            .map(|e| span::Event {
                time_unix_nano: e.time_unix_nano,
                name: e.name.clone(),
                attributes: to_key_values(&e.attributes),
                ..Default::default()
            })
            .collect(),
        status: Some(status),
        ..Default::default()
    }
}

fn to_key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.to_string(),
            value: Some(to_any_value(value)),
        })
        .collect()
}

fn to_any_value(value: &AttributeValue) -> AnyValue {
    let value = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::I64(i) => any_value::Value::IntValue(*i),
        AttributeValue::F64(f) => any_value::Value::DoubleValue(*f),
        AttributeValue::StringArray(items) => any_value::Value::ArrayValue(ArrayValue {
            values: items
                .iter()
                .map(|item| AnyValue {
                    value: Some(any_value::Value::StringValue(item.clone())),
                })
                .collect(),
        }),
    };
    AnyValue { value: Some(value) }
}

// Helper for creating string KeyValue attributes
fn kv_string(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::span::SpanBuilder;

    fn exporter() -> OtlpHttpExporter {
        OtlpHttpExporter::new(
            "http://localhost:4318/v1/traces",
            BTreeMap::new(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn string_attr<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a str> {
        attrs
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.as_ref())
            .and_then(|v| match &v.value {
                Some(any_value::Value::StringValue(s)) => Some(s.as_str()),
                _ => None,
            })
    }

    #[test]
    fn test_build_request_keeps_parent_links() {
        let root = SpanBuilder::start("agent.orchestration", None);
        let root_ctx = root.context();
        let root = root.end();
        let child = SpanBuilder::start("model.decision", Some(&root_ctx)).end();

        let request = exporter().to_export_request(&[root, child]);
        let spans = &request.resource_spans[0].scope_spans[0].spans;
        assert_eq!(spans.len(), 2);

        assert_eq!(spans[0].name, "agent.orchestration");
        assert!(spans[0].parent_span_id.is_empty()); // Root has no parent
        assert_eq!(spans[1].parent_span_id, spans[0].span_id);
        assert_eq!(spans[1].trace_id, spans[0].trace_id);
        assert_eq!(spans[0].trace_id.len(), 16);
        assert_eq!(spans[0].span_id.len(), 8);
    }

    #[test]
    fn test_attribute_and_status_conversion() {
        let mut builder = SpanBuilder::start("agent.tool_execution_result", None);
        builder.set_attribute("tools.available", vec!["calculator".to_string()]);
        builder.set_attribute("tools.count", 1usize);
        builder.record_error("division by zero");
        let request = exporter().to_export_request(&[builder.end()]);
        let span = &request.resource_spans[0].scope_spans[0].spans[0];

        let available = span
            .attributes
            .iter()
            .find(|kv| kv.key == "tools.available")
            .and_then(|kv| kv.value.clone())
            .and_then(|v| v.value);
        match available {
            Some(any_value::Value::ArrayValue(array)) => assert_eq!(array.values.len(), 1),
            other => panic!("expected array value, got {other:?}"),
        }

        let status = span.status.as_ref().unwrap();
        assert_eq!(status.code, status::StatusCode::Error as i32);
        assert_eq!(status.message, "division by zero");
        assert_eq!(span.events[0].name, "exception");
    }

    #[test]
    fn test_resource_attributes() {
        let mut extra = BTreeMap::new();
        extra.insert("deployment.environment".to_string(), "staging".to_string());
        let exporter = exporter().with_resource("smart-cli-assistant", Some("1.2.0"), &extra);
        let request = exporter.to_export_request(&[]);
        let attrs = &request.resource_spans[0].resource.as_ref().unwrap().attributes;

        assert_eq!(string_attr(attrs, "service.name"), Some("smart-cli-assistant"));
        assert_eq!(string_attr(attrs, "service.version"), Some("1.2.0"));
        assert_eq!(string_attr(attrs, "telemetry.sdk.language"), Some("rust"));
        assert_eq!(string_attr(attrs, "deployment.environment"), Some("staging"));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_an_error() {
        let exporter = OtlpHttpExporter::new(
            "http://127.0.0.1:1/v1/traces",
            BTreeMap::new(),
            Duration::from_secs(2),
        )
        .unwrap();
        let span = SpanBuilder::start("s", None).end();
        assert!(exporter.export(&[span]).await.is_err());
    }
}
