//! Enrichment error types
//!
//! None of these ever reach the orchestrator. Runtime kinds (`MissingField`,
//! `UnsupportedShape`, `ExportUnavailable`, `HandlerFault`) are handled where
//! they occur and only leave a log record behind. The configuration kinds are
//! returned from setup and config loading.

use std::path::PathBuf;
use thiserror::Error;

/// Target used for diagnostics about enrichment itself
pub const DIAGNOSTICS_TARGET: &str = "agentlens::diagnostics";

/// Errors produced by the enrichment layer
#[derive(Error, Debug)]
pub enum EnrichmentError {
    /// An event payload lacks a field the handler wanted; the attribute is skipped
    #[error("{event} payload has no `{field}` field")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    /// A value could not be encoded by its shape encoder; rendered as generic text instead
    #[error("cannot encode {shape} value: {reason}")]
    UnsupportedShape { shape: String, reason: String },

    /// The telemetry backend could not be reached; the batch is dropped
    #[error("telemetry export to {endpoint} unavailable")]
    ExportUnavailable {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unexpected fault while building a span, caught at the subscriber boundary
    #[error("{handler} handler fault: {detail}")]
    HandlerFault {
        handler: &'static str,
        detail: String,
    },

    /// Configuration failed validation
    #[error("invalid enrichment config: {0}")]
    InvalidConfig(String),

    /// Failed to read a configuration file
    #[error("failed to read enrichment config from {}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file
    #[error("failed to parse enrichment config (invalid YAML or JSON)")]
    ConfigParse {
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The export worker could not be started
    #[error("failed to start telemetry export worker")]
    PipelineStart {
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EnrichmentError>;

impl EnrichmentError {
    /// Wrap an exporter failure.
    pub fn export_unavailable(endpoint: impl Into<String>, source: anyhow::Error) -> Self {
        EnrichmentError::ExportUnavailable {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    /// Whether this kind only degrades telemetry detail.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnrichmentError::MissingField { .. }
                | EnrichmentError::UnsupportedShape { .. }
                | EnrichmentError::ExportUnavailable { .. }
                | EnrichmentError::HandlerFault { .. }
        )
    }

    /// Emit the error at the level its kind calls for.
    pub fn log(&self) {
        match self {
            EnrichmentError::MissingField { .. } | EnrichmentError::UnsupportedShape { .. } => {
                tracing::debug!("{}", self);
            }
            EnrichmentError::ExportUnavailable { source, .. } => {
                tracing::warn!("{}: {}", self, source);
            }
            EnrichmentError::HandlerFault { .. } => {
                tracing::warn!(target: DIAGNOSTICS_TARGET, "enrichment skipped: {}", self);
            }
            _ => {
                tracing::error!("{}", self);
            }
        }
    }
}
