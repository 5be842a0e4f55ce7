//! Oversized payloads are bounded on every span and event

mod common;

use agentlens_core::config::CaptureLimits;
use agentlens_core::enrich::{EXECUTION_SPAN, ORCHESTRATION_SPAN};
use agentlens_core::hooks::{CapabilityDescriptor, Message, ToolResult, ToolUse};
use agentlens_core::telemetry::AttributeValue;
use agentlens_core::{EnrichmentConfig, InvocationId, TRUNCATION_MARKER};
use common::*;
use serde_json::json;

fn tight_limits() -> CaptureLimits {
    CaptureLimits {
        max_attribute_bytes: 100,
        max_event_attribute_bytes: 150,
        max_description_bytes: 80,
        max_summary_bytes: 64,
        max_history_events: 2,
        ..Default::default()
    }
}

#[test]
fn test_oversized_payloads_are_bounded() {
    init_test_logging();
    let limits = tight_limits();
    let agent = MockAgent::new();
    let (handle, exporter) =
        enrich_in_memory(&agent, EnrichmentConfig::new("bounds").with_limits(limits.clone()));

    let huge = "é".repeat(5_000);
    let mut fixture = CalculatorFixture::with_result(ToolResult::success("t1", huge.clone()));
    fixture.snapshot.system_prompt = Some(huge.clone());
    fixture
        .snapshot
        .tools
        .push(CapabilityDescriptor::new("x".repeat(300), huge.clone()));
    fixture.snapshot.messages = (0..10).map(|i| Message::user(format!("{i}: {huge}"))).collect();
    fixture
        .snapshot
        .state
        .insert("notes".into(), json!(huge.clone()));
    fixture.tool_use = ToolUse::new("t1", "calculator", json!({"expression": huge.clone()}));
    fixture.answer = Message::assistant(huge.clone());

    agent.run(InvocationId::new(), None, fixture.turn());
    let spans = collect(&handle, &exporter);
    assert_eq!(spans.len(), 5);

    for span in &spans {
        for (key, value) in span.attributes().iter() {
            assert!(
                value.encoded_len() <= limits.max_attribute_bytes,
                "{}: {key} is {} bytes",
                span.name(),
                value.encoded_len()
            );
        }
        for event in span.events() {
            for (key, value) in event.attributes.iter() {
                assert!(
                    value.encoded_len() <= limits.max_event_attribute_bytes,
                    "{}/{}: {key} is {} bytes",
                    span.name(),
                    event.name,
                    value.encoded_len()
                );
            }
        }
    }

    let execution = spans_named(&spans, EXECUTION_SPAN)[0];
    let summary = str_attr(execution, "result.summary").expect("summary");
    assert!(summary.len() <= limits.max_summary_bytes);
    assert!(summary.ends_with(TRUNCATION_MARKER));

    let orchestration = spans_named(&spans, ORCHESTRATION_SPAN)[0];
    assert!(str_attr(orchestration, "system_prompt")
        .expect("system prompt")
        .ends_with(TRUNCATION_MARKER));
    assert_eq!(int_attr(orchestration, "messages.count"), Some(10));
    let history: Vec<i64> = orchestration
        .events()
        .iter()
        .filter(|e| e.name == "message")
        .filter_map(|e| e.attributes.get("message.index").and_then(AttributeValue::as_i64))
        .collect();
    assert_eq!(history, vec![8, 9]);
}

#[test]
fn test_sensitive_state_is_redacted() {
    init_test_logging();
    let agent = MockAgent::new();
    let (handle, exporter) = enrich_in_memory(&agent, EnrichmentConfig::new("bounds"));

    let mut fixture = CalculatorFixture::new();
    fixture
        .snapshot
        .state
        .insert("api_key".into(), json!("sk-live-123"));
    fixture
        .snapshot
        .state
        .insert("session".into(), json!({"password": "hunter2", "user": "ada"}));
    fixture.tool_use = ToolUse::new(
        "t1",
        "calculator",
        json!({"expression": "1 + 1", "auth_token": "abc"}),
    );
    agent.run(InvocationId::new(), None, fixture.turn());

    let spans = collect(&handle, &exporter);
    let orchestration = spans_named(&spans, ORCHESTRATION_SPAN)[0];
    assert_eq!(str_attr(orchestration, "context.api_key"), Some("[REDACTED]"));
    assert_eq!(
        str_attr(orchestration, "context.session.password"),
        Some("[REDACTED]")
    );
    assert_eq!(str_attr(orchestration, "context.session.user"), Some("ada"));

    for span in &spans {
        for (_, value) in span.attributes().iter() {
            if let Some(text) = value.as_str() {
                assert!(!text.contains("sk-live-123"));
                assert!(!text.contains("hunter2"));
                assert!(!text.contains("\"abc\""));
            }
        }
    }
}
