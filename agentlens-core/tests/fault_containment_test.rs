//! Enrichment must never change what the orchestrator does

mod common;

use agentlens_core::codec::AttributeCodec;
use agentlens_core::enrich::{EXECUTION_SPAN, ORCHESTRATION_SPAN};
use agentlens_core::error::EnrichmentError;
use agentlens_core::hooks::LifecycleEventKind;
use agentlens_core::telemetry::{InMemoryExporter, OtlpHttpExporter, TelemetryPipeline};
use agentlens_core::{
    attach, setup_with_exporter, EnrichmentConfig, Enricher, InvocationId, Orchestrator,
    ShapeEncoder,
};
use anyhow::Result;
use common::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const ANSWER: &str = "15% of 230 is 34.5.";

/// Claims every shape and panics while summarizing it.
struct PanickingEncoder;

impl ShapeEncoder for PanickingEncoder {
    fn shape(&self) -> &str {
        "panicking"
    }

    fn matches(&self, _value: &Value) -> bool {
        true
    }

    fn summarize(&self, _value: &Value) -> agentlens_core::Result<String> {
        panic!("encoder exploded")
    }
}

/// Claims every shape and always fails.
struct RefusingEncoder;

impl ShapeEncoder for RefusingEncoder {
    fn shape(&self) -> &str {
        "refusing"
    }

    fn matches(&self, _value: &Value) -> bool {
        true
    }

    fn summarize(&self, _value: &Value) -> agentlens_core::Result<String> {
        Err(EnrichmentError::UnsupportedShape {
            shape: "refusing".to_string(),
            reason: "never supported".to_string(),
        })
    }
}

fn attach_with_encoder(
    agent: &MockAgent,
    encoder: Arc<dyn ShapeEncoder>,
) -> Result<(agentlens_core::EnrichmentHandle, InMemoryExporter)> {
    let config = EnrichmentConfig::new("faults");
    let exporter = InMemoryExporter::new();
    let pipeline = Arc::new(TelemetryPipeline::with_exporter(
        Arc::new(exporter.clone()),
        &config.queue,
    )?);
    let codec = AttributeCodec::from_config(&config)?.with_encoder(encoder);
    let enricher = Enricher::new(&config, pipeline)?.with_codec(codec);
    Ok((attach(agent.hooks(), Arc::new(enricher)), exporter))
}

#[test]
fn test_panicking_encoder_is_contained() -> Result<()> {
    init_test_logging();
    let agent = MockAgent::new();
    let (handle, exporter) = attach_with_encoder(&agent, Arc::new(PanickingEncoder))?;

    let fixture = CalculatorFixture::new();
    let answer = agent.run(InvocationId::new(), None, fixture.turn());
    assert_eq!(answer, ANSWER);

    let spans = collect(&handle, &exporter);
    // History summaries go through the encoder, so orchestration spans are lost
    assert!(spans_named(&spans, ORCHESTRATION_SPAN).is_empty());
    assert_eq!(spans_named(&spans, EXECUTION_SPAN).len(), 1);
    assert_eq!(handle.stats().handler_faults, 2);
    assert!(handle.is_attached());
    Ok(())
}

#[test]
fn test_failing_encoder_falls_back_to_json() -> Result<()> {
    init_test_logging();
    let agent = MockAgent::new();
    let (handle, exporter) = attach_with_encoder(&agent, Arc::new(RefusingEncoder))?;

    let fixture = CalculatorFixture::new();
    agent.run(InvocationId::new(), None, fixture.turn());

    let spans = collect(&handle, &exporter);
    assert_eq!(spans.len(), 5);
    assert_eq!(handle.stats().handler_faults, 0);

    let orchestration = spans_named(&spans, ORCHESTRATION_SPAN)[0];
    assert_eq!(
        event_str(orchestration, "message", "message.summary"),
        Some(r#"[{"text":"What is 15% of 230?"}]"#)
    );
    Ok(())
}

#[test]
fn test_setup_twice_does_not_double_emit() {
    init_test_logging();
    let agent = MockAgent::new();
    let (first, first_spans) = enrich_in_memory(&agent, EnrichmentConfig::new("once"));
    let second_spans = InMemoryExporter::new();
    let second = setup_with_exporter(
        &agent,
        EnrichmentConfig::new("twice"),
        Arc::new(second_spans.clone()),
    )
    .expect("second setup");

    assert!(Arc::ptr_eq(first.enricher(), second.enricher()));
    assert_eq!(agent.hooks().callback_count(), LifecycleEventKind::ALL.len());

    let fixture = CalculatorFixture::new();
    agent.run(InvocationId::new(), None, fixture.turn());

    assert_eq!(collect(&first, &first_spans).len(), 5);
    assert!(second_spans.finished_spans().is_empty());
}

#[test]
fn test_detach_stops_enrichment() {
    init_test_logging();
    let agent = MockAgent::new();
    let (handle, exporter) = enrich_in_memory(&agent, EnrichmentConfig::new("detach"));
    let fixture = CalculatorFixture::new();

    agent.run(InvocationId::new(), None, fixture.turn());
    assert_eq!(collect(&handle, &exporter).len(), 5);

    assert!(handle.detach());
    assert_eq!(agent.hooks().callback_count(), 0);
    let answer = agent.run(InvocationId::new(), None, fixture.turn());
    assert_eq!(answer, ANSWER);
    assert_eq!(collect(&handle, &exporter).len(), 5);
}

#[test]
fn test_shutdown_drains_queue() {
    init_test_logging();
    let agent = MockAgent::new();
    let (handle, exporter) = enrich_in_memory(&agent, EnrichmentConfig::new("drain"));
    let fixture = CalculatorFixture::new();
    agent.run(InvocationId::new(), None, fixture.turn());

    assert!(handle.shutdown(FLUSH_TIMEOUT));
    assert_eq!(exporter.finished_spans().len(), 5);
    assert!(!handle.is_attached());
    // Idempotent
    assert!(handle.shutdown(FLUSH_TIMEOUT));
}

#[test]
fn test_unreachable_collector_never_faults() -> Result<()> {
    init_test_logging();
    let agent = MockAgent::new();
    let exporter = OtlpHttpExporter::new(
        "http://127.0.0.1:1/v1/traces",
        BTreeMap::new(),
        Duration::from_millis(500),
    )?
    .with_resource("unreachable", None, &BTreeMap::new());
    let handle = setup_with_exporter(&agent, EnrichmentConfig::new("unreachable"), Arc::new(exporter))?;

    let fixture = CalculatorFixture::new();
    let answer = agent.run(InvocationId::new(), None, fixture.turn());
    assert_eq!(answer, ANSWER);

    assert!(handle.flush(Duration::from_secs(10)));
    let stats = handle.stats();
    assert_eq!(stats.submitted, 5);
    assert_eq!(stats.exported, 0);
    assert!(stats.export_failures >= 1);
    assert_eq!(stats.handler_faults, 0);
    Ok(())
}
