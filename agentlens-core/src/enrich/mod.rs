//! Enrichment handlers
//!
//! One handler per lifecycle event kind, each building a span with a fixed
//! attribute and event schema:
//!
//! | Event              | Span                          |
//! |--------------------|-------------------------------|
//! | `BeforeInvocation` | `agent.orchestration`         |
//! | `BeforeToolCall`   | `model.decision` (tool_use)   |
//! | `AfterModelCall`   | `model.decision` (final_answer, only when no tool was chosen) |
//! | `AfterToolCall`    | `agent.tool_execution_result` |
//! | `AfterInvocation`  | none; releases correlation state |
//!
//! Handlers only build spans. [`Enricher::handle`] owns the side effects:
//! advancing the correlator and queueing sampled spans for export.

mod decision;
mod execution;
mod orchestration;

pub use execution::ExecutionOutcome;

use std::sync::Arc;

use crate::codec::AttributeCodec;
use crate::config::EnrichmentConfig;
use crate::error::{EnrichmentError, Result};
use crate::hooks::{FieldReader, InvocationId, LifecycleEvent};
use crate::telemetry::{
    AttributeValue, ContextCorrelator, Sampler, SpanBuilder, TelemetryPipeline, TelemetrySpan,
};

pub const ORCHESTRATION_SPAN: &str = "agent.orchestration";
pub const DECISION_SPAN: &str = "model.decision";
pub const EXECUTION_SPAN: &str = "agent.tool_execution_result";

/// Reported as `enrichment.version` on every span
pub const ENRICHMENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds spans from lifecycle events and hands them to the pipeline.
pub struct Enricher {
    codec: AttributeCodec,
    fields: FieldReader,
    correlator: ContextCorrelator,
    sampler: Sampler,
    static_attributes: Vec<(String, AttributeValue)>,
    pipeline: Arc<TelemetryPipeline>,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("sampler", &self.sampler)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Enricher {
    pub fn new(config: &EnrichmentConfig, pipeline: Arc<TelemetryPipeline>) -> Result<Self> {
        let codec = AttributeCodec::from_config(config)?;
        let static_attributes = config
            .static_attributes
            .iter()
            .map(|(key, value)| (key.clone(), codec.encode(key, value)))
            .collect();

        Ok(Self {
            codec,
            fields: FieldReader::new(config.fields.clone()),
            correlator: ContextCorrelator::new(config.limits.max_tracked_invocations),
            sampler: Sampler::from_config(&config.sampler),
            static_attributes,
            pipeline,
        })
    }

    /// Replace the codec (e.g. to register extra shape encoders).
    pub fn with_codec(mut self, codec: AttributeCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> &AttributeCodec {
        &self.codec
    }

    pub fn correlator(&self) -> &ContextCorrelator {
        &self.correlator
    }

    pub fn pipeline(&self) -> &Arc<TelemetryPipeline> {
        &self.pipeline
    }

    /// Enrich one lifecycle event.
    pub fn handle(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        match event {
            LifecycleEvent::BeforeInvocation(e) => {
                self.correlator.begin(e.invocation, e.trace_context);
                let span = self.orchestration_span(e);
                self.emit(e.invocation, span);
            }
            LifecycleEvent::AfterModelCall(e) => {
                if let Some(span) = self.final_answer_span(e) {
                    self.emit(e.invocation, span);
                }
            }
            LifecycleEvent::BeforeToolCall(e) => {
                let span = self.decision_span(e);
                self.emit(e.invocation, span);
            }
            LifecycleEvent::AfterToolCall(e) => {
                let span = self.execution_span(e);
                self.emit(e.invocation, span);
            }
            LifecycleEvent::AfterInvocation(e) => {
                self.correlator.end(e.invocation);
            }
        }
        Ok(())
    }

    /// Open a span under the invocation's current context with the common attributes.
    fn start_span(&self, name: &str, invocation: InvocationId) -> SpanBuilder {
        let parent = self.correlator.current_context(invocation);
        let mut span = SpanBuilder::start(name, parent.as_ref());
        let trace_id = span.context().trace_id;
        span.set_sampled(self.sampler.should_sample(parent.as_ref(), trace_id));
        span.set_attributes(self.static_attributes.iter().cloned());
        span.set_attribute("enrichment.version", ENRICHMENT_VERSION);
        span.set_attribute("invocation.id", invocation.to_string());
        span
    }

    fn emit(&self, invocation: InvocationId, span: TelemetrySpan) {
        self.correlator.advance(invocation, span.context());
        if span.is_sampled() {
            self.pipeline.submit(span);
        }
    }
}

/// Log a missing payload field; the attribute it would have produced is skipped.
fn missing(event: &'static str, field: &'static str) {
    EnrichmentError::MissingField { event, field }.log();
}
