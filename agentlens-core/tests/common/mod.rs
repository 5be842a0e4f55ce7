//! Test helpers shared by the integration tests (tests/common/ pattern).
//!
//! `MockAgent` stands in for an orchestrator: it owns a hook registry and
//! fires lifecycle events in the order a real agent loop would.

#![allow(dead_code)]

use agentlens_core::hooks::{
    AfterInvocationEvent, AfterModelCallEvent, AfterToolCallEvent, AgentSnapshot,
    BeforeInvocationEvent, BeforeToolCallEvent, CapabilityDescriptor, ContentBlock, Message,
    Role, Source, ToolResult, ToolUse,
};
use agentlens_core::telemetry::{AttributeValue, InMemoryExporter, TelemetrySpan};
use agentlens_core::{
    setup_with_exporter, EnrichmentConfig, EnrichmentHandle, HookRegistry, InvocationId,
    LifecycleEvent, Orchestrator, TraceContext,
};
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Payloads for one tool-using invocation: the model picks a tool, the tool
/// runs, then the model answers.
#[derive(Clone, Copy)]
pub struct Turn<'a> {
    pub agent: Source<'a, AgentSnapshot>,
    pub decision: Source<'a, Message>,
    pub tool_use: Source<'a, ToolUse>,
    pub result: Source<'a, ToolResult>,
    pub exception: Option<&'a str>,
    pub answer: Source<'a, Message>,
}

/// Minimal orchestrator exposing a hook registry.
#[derive(Default)]
pub struct MockAgent {
    hooks: HookRegistry,
}

impl Orchestrator for MockAgent {
    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one invocation through the full lifecycle and return the
    /// orchestrator's own output, which enrichment must never change.
    pub fn run(&self, invocation: InvocationId, ambient: Option<TraceContext>, turn: Turn<'_>) -> String {
        let hooks = &self.hooks;
        hooks.dispatch(&LifecycleEvent::BeforeInvocation(BeforeInvocationEvent {
            invocation,
            trace_context: ambient,
            agent: turn.agent,
        }));
        hooks.dispatch(&LifecycleEvent::AfterModelCall(AfterModelCallEvent {
            invocation,
            message: turn.decision,
            stop_reason: Some("tool_use"),
        }));
        hooks.dispatch(&LifecycleEvent::BeforeToolCall(BeforeToolCallEvent {
            invocation,
            tool_use: turn.tool_use,
        }));
        hooks.dispatch(&LifecycleEvent::AfterToolCall(AfterToolCallEvent {
            invocation,
            tool_use: Some(turn.tool_use),
            result: turn.result,
            exception: turn.exception,
        }));
        hooks.dispatch(&LifecycleEvent::BeforeInvocation(BeforeInvocationEvent {
            invocation,
            trace_context: ambient,
            agent: turn.agent,
        }));
        hooks.dispatch(&LifecycleEvent::AfterModelCall(AfterModelCallEvent {
            invocation,
            message: turn.answer,
            stop_reason: Some("end_turn"),
        }));
        hooks.dispatch(&LifecycleEvent::AfterInvocation(AfterInvocationEvent {
            invocation,
        }));

        match turn.answer {
            Source::Typed(message) => message.text(),
            Source::Mapping(value) => value["content"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Typed fixtures for the calculator scenario.
pub struct CalculatorFixture {
    pub snapshot: AgentSnapshot,
    pub decision: Message,
    pub tool_use: ToolUse,
    pub result: ToolResult,
    pub answer: Message,
}

impl CalculatorFixture {
    pub fn new() -> Self {
        Self::with_result(ToolResult::success("t1", "34.5"))
    }

    pub fn with_result(result: ToolResult) -> Self {
        let tool_use = ToolUse::new("t1", "calculator", json!({"expression": "230 * 0.15"}));
        let mut state = serde_json::Map::new();
        state.insert("user_name".into(), json!("ada"));
        state.insert("_internal".into(), json!("hidden"));

        Self {
            snapshot: AgentSnapshot {
                tools: vec![CapabilityDescriptor::new(
                    "calculator",
                    "Evaluate arithmetic expressions",
                )
                .with_schema(json!({
                    "type": "object",
                    "properties": {"expression": {"type": "string"}}
                }))],
                messages: vec![Message::user("What is 15% of 230?")],
                system_prompt: Some("You are a helpful assistant.".to_string()),
                state,
            },
            decision: Message::new(
                Role::Assistant,
                vec![
                    ContentBlock::Text("Let me calculate that.".into()),
                    ContentBlock::ToolUse(tool_use.clone()),
                ],
            ),
            tool_use,
            result,
            answer: Message::assistant("15% of 230 is 34.5."),
        }
    }

    pub fn turn(&self) -> Turn<'_> {
        Turn {
            agent: Source::Typed(&self.snapshot),
            decision: Source::Typed(&self.decision),
            tool_use: Source::Typed(&self.tool_use),
            result: Source::Typed(&self.result),
            exception: None,
            answer: Source::Typed(&self.answer),
        }
    }
}

/// The same calculator scenario as loose mappings.
pub struct MappingFixture {
    pub agent: Value,
    pub decision: Value,
    pub tool_use: Value,
    pub result: Value,
    pub answer: Value,
}

impl MappingFixture {
    pub fn new() -> Self {
        let tool_use = json!({
            "toolUseId": "t1",
            "name": "calculator",
            "input": {"expression": "230 * 0.15"}
        });
        Self {
            agent: json!({
                "tools": [{
                    "name": "calculator",
                    "description": "Evaluate arithmetic expressions",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"expression": {"type": "string"}}
                    }
                }],
                "messages": [
                    {"role": "user", "content": [{"text": "What is 15% of 230?"}]}
                ],
                "system_prompt": "You are a helpful assistant.",
                "state": {"user_name": "ada", "_internal": "hidden"}
            }),
            decision: json!({
                "role": "assistant",
                "content": [{"text": "Let me calculate that."}, {"toolUse": tool_use.clone()}]
            }),
            tool_use,
            result: json!({
                "toolUseId": "t1",
                "status": "success",
                "content": [{"text": "34.5"}]
            }),
            answer: json!({
                "role": "assistant",
                "content": [{"text": "15% of 230 is 34.5."}]
            }),
        }
    }

    pub fn turn(&self) -> Turn<'_> {
        Turn {
            agent: Source::Mapping(&self.agent),
            decision: Source::Mapping(&self.decision),
            tool_use: Source::Mapping(&self.tool_use),
            result: Source::Mapping(&self.result),
            exception: None,
            answer: Source::Mapping(&self.answer),
        }
    }
}

/// Enrich `agent` into an in-memory exporter.
pub fn enrich_in_memory(
    agent: &MockAgent,
    config: EnrichmentConfig,
) -> (EnrichmentHandle, InMemoryExporter) {
    let exporter = InMemoryExporter::new();
    let handle = setup_with_exporter(agent, config, Arc::new(exporter.clone()))
        .expect("enrichment setup");
    (handle, exporter)
}

/// Flush and collect everything exported so far.
pub fn collect(handle: &EnrichmentHandle, exporter: &InMemoryExporter) -> Vec<TelemetrySpan> {
    assert!(handle.flush(FLUSH_TIMEOUT), "flush timed out");
    exporter.finished_spans()
}

pub fn spans_named<'a>(spans: &'a [TelemetrySpan], name: &str) -> Vec<&'a TelemetrySpan> {
    spans.iter().filter(|s| s.name() == name).collect()
}

pub fn str_attr<'a>(span: &'a TelemetrySpan, key: &str) -> Option<&'a str> {
    span.attribute(key).and_then(AttributeValue::as_str)
}

pub fn int_attr(span: &TelemetrySpan, key: &str) -> Option<i64> {
    span.attribute(key).and_then(AttributeValue::as_i64)
}

pub fn event_str<'a>(span: &'a TelemetrySpan, event: &str, key: &str) -> Option<&'a str> {
    span.event(event)
        .and_then(|e| e.attributes.get(key))
        .and_then(AttributeValue::as_str)
}
