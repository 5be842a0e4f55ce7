//! `agent.tool_execution_result`: how a tool call turned out.

use serde_json::Value;

use super::{missing, Enricher, EXECUTION_SPAN};
use crate::codec::bounded;
use crate::hooks::AfterToolCallEvent;
use crate::telemetry::{Attributes, SpanStatus, TelemetrySpan};

const AFTER_TOOL_CALL: &str = "AfterToolCall";

/// Normalized tool outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Error,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Error => "error",
        }
    }

    /// Only an explicit `success` status with no reported error is a success.
    pub fn normalize(status: Option<&str>, has_error: bool) -> Self {
        match status {
            Some(s) if !has_error && s.trim().eq_ignore_ascii_case("success") => {
                ExecutionOutcome::Success
            }
            _ => ExecutionOutcome::Error,
        }
    }
}

impl Enricher {
    pub(super) fn execution_span(&self, event: &AfterToolCallEvent<'_>) -> TelemetrySpan {
        let limits = self.codec.limits();
        let result = self.fields.tool_result(event.result);
        let tool_use = event.tool_use.map(|t| self.fields.tool_use(t));
        let mut span = self.start_span(EXECUTION_SPAN, event.invocation);

        let use_id = result
            .tool_use_id
            .as_deref()
            .or_else(|| tool_use.as_ref().and_then(|t| t.tool_use_id.as_deref()))
            .map(|id| bounded(id, limits.max_attribute_bytes));
        match use_id.as_deref() {
            Some(id) => span.set_attribute("tool.use_id", id),
            None => missing(AFTER_TOOL_CALL, "toolUseId"),
        }
        if let Some(name) = tool_use.as_ref().and_then(|t| t.name.as_deref()) {
            span.set_attribute("tool.name", self.codec.text(name, limits.max_attribute_bytes));
        }

        let has_error = event.exception.is_some() || result.error.is_some();
        let outcome = ExecutionOutcome::normalize(result.status.as_deref(), has_error);
        span.set_attribute("tool.status", outcome.as_str());
        span.set_attribute("result.content_blocks", result.content_blocks());

        let first_text = result.first_text();
        let mut attrs = Attributes::new().with("tool.status", outcome.as_str());
        if let Some(id) = use_id.as_deref() {
            attrs.insert("tool.use_id", id);
        }

        match outcome {
            ExecutionOutcome::Success => {
                let summary = match &first_text {
                    Some(text) => bounded(text, limits.max_summary_bytes),
                    None => self.codec.summarize(&result.content),
                };
                let full = match &first_text {
                    Some(text) if result.content_blocks() <= 1 => {
                        bounded(text, limits.max_event_attribute_bytes)
                    }
                    _ => self
                        .codec
                        .json(&result.content, limits.max_event_attribute_bytes),
                };
                span.set_attribute("result.summary", summary.clone());
                attrs.insert("tool.result.summary", summary);
                attrs.insert("tool.result.full", full);
                span.add_event("tool.execution_completed", attrs);
                span.set_status(SpanStatus::Ok);
            }
            ExecutionOutcome::Error => {
                let detail = event
                    .exception
                    .map(str::to_string)
                    .or_else(|| result.error.as_deref().map(str::to_string))
                    .or(first_text)
                    .or_else(|| match result.content.as_ref() {
                        Value::Null => None,
                        other => Some(self.codec.summarize(other)),
                    })
                    .unwrap_or_else(|| "Unknown error".to_string());
                attrs.insert(
                    "error.detail",
                    bounded(&detail, limits.max_event_attribute_bytes),
                );
                span.add_event("tool.execution_failed", attrs);
                span.record_error(bounded(&detail, limits.max_attribute_bytes));
            }
        }

        span.end()
    }
}
