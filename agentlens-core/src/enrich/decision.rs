//! `model.decision`: what the model chose and with which inputs.

use serde_json::Value;
use std::borrow::Cow;

use super::{missing, Enricher, DECISION_SPAN};
use crate::codec::bounded;
use crate::hooks::{AfterModelCallEvent, BeforeToolCallEvent};
use crate::telemetry::{Attributes, SpanStatus, TelemetrySpan};

const BEFORE_TOOL_CALL: &str = "BeforeToolCall";

fn input_count(input: Option<&Value>) -> usize {
    match input {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(items)) => items.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    }
}

impl Enricher {
    pub(super) fn decision_span(&self, event: &BeforeToolCallEvent<'_>) -> TelemetrySpan {
        let limits = self.codec.limits();
        let tool_use = self.fields.tool_use(event.tool_use);
        let mut span = self.start_span(DECISION_SPAN, event.invocation);
        span.set_attribute("decision.type", "tool_use");

        let name = tool_use.name.as_deref();
        match name {
            Some(name) => {
                span.set_attribute(
                    "tool.selected",
                    self.codec.text(name, limits.max_attribute_bytes),
                );
                if let Some(description) = self.correlator.capability(event.invocation, name) {
                    span.set_attribute("tool.matched", true);
                    if !description.is_empty() {
                        span.set_attribute(
                            "tool.description",
                            self.codec.text(&description, limits.max_description_bytes),
                        );
                    }
                }
            }
            None => missing(BEFORE_TOOL_CALL, "name"),
        }

        let use_id = tool_use
            .tool_use_id
            .as_deref()
            .map(|id| bounded(id, limits.max_attribute_bytes));
        match use_id.as_deref() {
            Some(id) => span.set_attribute("tool.use_id", id),
            None => missing(BEFORE_TOOL_CALL, "toolUseId"),
        }

        let input = tool_use.input.as_deref();
        let count = input_count(input);
        match input {
            Some(input) => span.set_attribute(
                "tool.inputs",
                self.codec.json(input, limits.max_attribute_bytes),
            ),
            None => missing(BEFORE_TOOL_CALL, "input"),
        }
        span.set_attribute("tool.input_count", count);

        let shown_name = name.unwrap_or("unknown");
        let mut attrs = Attributes::new()
            .with("tool.name", self.codec.text(shown_name, limits.max_attribute_bytes))
            .with(
                "decision.explanation",
                bounded(
                    &format!("Model selected {shown_name} with {count} parameters"),
                    limits.max_event_attribute_bytes,
                ),
            );
        if let Some(id) = use_id {
            attrs.insert("tool.use_id", id);
        }
        if let Some(input) = input {
            attrs.insert(
                "tool.inputs.full",
                self.codec.json(input, limits.max_event_attribute_bytes),
            );
        }
        span.add_event("model.decided_tool", attrs);

        span.set_status(SpanStatus::Ok);
        span.end()
    }

    /// Only model outputs that end the turn get a span here; tool selections
    /// are recorded per call by [`Enricher::decision_span`].
    pub(super) fn final_answer_span(
        &self,
        event: &AfterModelCallEvent<'_>,
    ) -> Option<TelemetrySpan> {
        let limits = self.codec.limits();
        let message = self.fields.message(event.message);
        let stop_reason = event
            .stop_reason
            .map(Cow::Borrowed)
            .or_else(|| message.stop_reason.clone());

        if message.has_tool_use() || stop_reason.as_deref() == Some("tool_use") {
            return None;
        }

        let mut span = self.start_span(DECISION_SPAN, event.invocation);
        span.set_attribute("decision.type", "final_answer");
        if let Some(reason) = stop_reason.as_deref() {
            span.set_attribute(
                "model.stop_reason",
                self.codec.text(reason, limits.max_attribute_bytes),
            );
        }

        let text = message.text();
        let summary = if text.is_empty() {
            self.codec.summarize(&message.content)
        } else {
            bounded(&text, limits.max_summary_bytes)
        };
        span.set_attribute("response.summary", summary);
        span.add_event(
            "model.final_answer",
            Attributes::new().with(
                "response.full",
                self.codec.text(&text, limits.max_event_attribute_bytes),
            ),
        );

        span.set_status(SpanStatus::Ok);
        Some(span.end())
    }
}
