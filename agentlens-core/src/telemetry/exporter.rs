//! Span exporters.
//!
//! Exporters run on the pipeline's worker thread only, never on the
//! orchestrator's thread, so they are free to do I/O.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::{EnrichmentConfig, ExporterConfig};
use crate::error::EnrichmentError;

use super::otlp::OtlpHttpExporter;
use super::span::TelemetrySpan;
use super::writer::{ConsoleExporter, FileExporter};

/// A sink for finished spans.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Send one batch. Errors are logged by the pipeline and the batch dropped.
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()>;

    /// Where spans go, for diagnostics.
    fn endpoint(&self) -> String;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the exporter selected by `config`, mirrored to stdout when
/// `config.console` is set.
pub fn build_exporter(
    config: &EnrichmentConfig,
) -> std::result::Result<Arc<dyn SpanExporter>, EnrichmentError> {
    let primary = primary_exporter(config)?;
    match (config.console, &config.exporter) {
        (Some(_), ExporterConfig::Console { .. }) | (None, _) => Ok(primary),
        (Some(format), _) => Ok(Arc::new(FanoutExporter::new(vec![
            primary,
            Arc::new(ConsoleExporter::stdout(format)),
        ]))),
    }
}

fn primary_exporter(
    config: &EnrichmentConfig,
) -> std::result::Result<Arc<dyn SpanExporter>, EnrichmentError> {
    match &config.exporter {
        ExporterConfig::Otlp {
            endpoint,
            traces_endpoint,
            headers,
            timeout_ms,
        } => {
            let exporter = OtlpHttpExporter::new(
                crate::config::traces_url(endpoint, traces_endpoint.as_deref()),
                headers.clone(),
                Duration::from_millis(*timeout_ms),
            )
            .map_err(|e| EnrichmentError::InvalidConfig(format!("{e:#}")))?
            .with_resource(
                &config.service_name,
                config.service_version.as_deref(),
                &config.resource_attributes,
            );
            Ok(Arc::new(exporter))
        }
        ExporterConfig::File {
            destination,
            format,
        } => Ok(Arc::new(FileExporter::new(destination.clone(), *format))),
        ExporterConfig::Console { format } => Ok(Arc::new(ConsoleExporter::stdout(*format))),
        ExporterConfig::None => Ok(Arc::new(NoopExporter)),
    }
}

/// Sends every batch to each exporter in turn. One failing exporter does
/// not stop the others; the batch counts as failed if any of them failed.
pub struct FanoutExporter {
    exporters: Vec<Arc<dyn SpanExporter>>,
}

impl FanoutExporter {
    pub fn new(exporters: Vec<Arc<dyn SpanExporter>>) -> Self {
        Self { exporters }
    }
}

#[async_trait]
impl SpanExporter for FanoutExporter {
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()> {
        let mut failures = Vec::new();
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(batch).await {
                failures.push(format!("{}: {e:#}", exporter.endpoint()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }

    fn endpoint(&self) -> String {
        self.exporters
            .iter()
            .map(|e| e.endpoint())
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn shutdown(&self) -> Result<()> {
        for exporter in &self.exporters {
            exporter.shutdown().await?;
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExporter;

#[async_trait]
impl SpanExporter for NoopExporter {
    async fn export(&self, _batch: &[TelemetrySpan]) -> Result<()> {
        Ok(())
    }

    fn endpoint(&self) -> String {
        "none".to_string()
    }
}

/// Keeps exported spans in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<TelemetrySpan>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything exported so far, in export order.
    pub fn finished_spans(&self) -> Vec<TelemetrySpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(batch);
        Ok(())
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}
