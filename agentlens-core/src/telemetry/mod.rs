//! Span model, correlation and export for enrichment telemetry.
//!
//! ## Architecture
//!
//! ```text
//! agent.orchestration            (BeforeInvocation)
//!   └── model.decision           (BeforeToolCall / final answer)
//!         └── agent.tool_execution_result   (AfterToolCall)
//!               └── model.decision           (next turn)
//!                     └── ...
//! ```
//!
//! Each span nests under the previous enrichment span of the same
//! invocation ([`ContextCorrelator`]). Closed spans go through a bounded
//! queue to a background worker ([`TelemetryPipeline`]) which batches them
//! into an exporter: OTLP/HTTP, daily files, stdout, memory or nowhere.

pub mod context;
pub mod exporter;
pub mod otlp;
pub mod pipeline;
pub mod sampler;
pub mod span;
pub mod writer;

pub use context::ContextCorrelator;
pub use exporter::{
    build_exporter, FanoutExporter, InMemoryExporter, NoopExporter, SpanExporter,
};
pub use otlp::OtlpHttpExporter;
pub use pipeline::{PipelineStats, PipelineStatsSnapshot, TelemetryPipeline};
pub use sampler::Sampler;
pub use span::{
    AttributeValue, Attributes, SpanBuilder, SpanEvent, SpanId, SpanKind, SpanStatus,
    TelemetrySpan, TraceContext, TraceId,
};
pub use writer::{ConsoleExporter, FileExporter};
