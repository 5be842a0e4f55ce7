//! Agentlens trace enrichment library exports
//!
//! Subscribes to an agent orchestrator's lifecycle hooks and records why
//! each step happened as OTLP spans: which capabilities were offered, what
//! the model decided, and how each tool call turned out.

pub mod codec;
pub mod config;
pub mod enrich;
pub mod error;
pub mod hooks;
pub mod setup;
pub mod subscriber;
pub mod telemetry;

pub use codec::{AttributeCodec, ShapeEncoder, TRUNCATION_MARKER};
pub use config::{EnrichmentConfig, ExporterConfig, SamplerConfig};
pub use enrich::Enricher;
pub use error::{EnrichmentError, Result};
pub use hooks::{HookRegistry, InvocationId, LifecycleEvent, LifecycleEventKind, Orchestrator};
pub use setup::{setup, setup_with_exporter};
pub use subscriber::{attach, EnrichmentHandle};
pub use telemetry::{TelemetrySpan, TraceContext};
