//! `agent.orchestration`: what the model is about to see.

use serde_json::{Map, Value};

use super::{Enricher, ORCHESTRATION_SPAN};
use crate::codec::bounded;
use crate::hooks::BeforeInvocationEvent;
use crate::telemetry::{Attributes, SpanStatus, TelemetrySpan};

impl Enricher {
    pub(super) fn orchestration_span(&self, event: &BeforeInvocationEvent<'_>) -> TelemetrySpan {
        let limits = self.codec.limits();
        let mut span = self.start_span(ORCHESTRATION_SPAN, event.invocation);

        // Capabilities
        let tools = self.fields.tools(event.agent);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        span.set_attribute("tools.count", tools.len());
        span.set_attribute("tools.available", self.codec.encode_list(&names));

        for (index, tool) in tools.iter().enumerate() {
            let mut attrs = Attributes::new()
                .with("tool.index", index)
                .with("tool.name", self.codec.text(&tool.name, limits.max_attribute_bytes))
                .with("tool.has_schema", tool.input_schema.is_some());
            if let Some(description) = &tool.description {
                attrs.insert(
                    "tool.description",
                    self.codec.text(description, limits.max_description_bytes),
                );
            }
            if let Some(schema) = &tool.input_schema {
                attrs.insert(
                    "tool.input_schema",
                    bounded(&schema.to_string(), limits.max_attribute_bytes),
                );
            }
            span.add_event("tool.spec", attrs);
        }

        self.correlator.record_capabilities(
            event.invocation,
            tools.iter().map(|t| {
                (
                    t.name.to_string(),
                    t.description.as_deref().unwrap_or_default().to_string(),
                )
            }),
        );

        // History: count plus the trailing entries
        let messages = self.fields.messages(event.agent);
        span.set_attribute("messages.count", messages.len());
        let skip = messages.len().saturating_sub(limits.max_history_events);
        for (index, message) in messages.iter().enumerate().skip(skip) {
            span.add_event(
                "message",
                Attributes::new()
                    .with("message.index", index)
                    .with(
                        "message.role",
                        self.codec.text(
                            message.role.as_deref().unwrap_or("unknown"),
                            limits.max_attribute_bytes,
                        ),
                    )
                    .with("message.summary", self.codec.summarize(&message.content)),
            );
        }

        if let Some(prompt) = self.fields.system_prompt(event.agent) {
            span.set_attribute(
                "system_prompt",
                self.codec.text(&prompt, limits.max_attribute_bytes),
            );
            span.add_event(
                "system_prompt",
                Attributes::new().with(
                    "prompt",
                    self.codec.text(&prompt, limits.max_event_attribute_bytes),
                ),
            );
        }

        // Agent state, private keys excluded
        if let Some(state) = self.fields.state(event.agent) {
            let visible: Map<String, Value> = state
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if !visible.is_empty() {
                span.set_attributes(self.codec.encode_fields("context", &Value::Object(visible)));
            }
        }

        span.set_attribute("orchestration.phase", "before_model_invocation");
        span.set_attribute("decision.pending", true);
        span.set_status(SpanStatus::Ok);
        span.end()
    }
}
