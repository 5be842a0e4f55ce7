//! File and console output for enrichment spans.
//!
//! Spans are appended to one file per day in the destination directory:
//! - `spans-YYYY-MM-DD.jsonl` - one JSON span per line (for log shippers)
//! - `spans-YYYY-MM-DD.txt` - human-readable blocks for quick debugging
//!
//! [`ConsoleExporter`] prints the same formats to stdout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, UNIX_EPOCH};

use crate::config::TelemetryFormat;

use super::exporter::SpanExporter;
use super::span::{SpanStatus, TelemetrySpan};

/// Writes spans to daily files under a directory.
#[derive(Debug, Clone)]
pub struct FileExporter {
    destination: PathBuf,
    format: TelemetryFormat,
}

impl FileExporter {
    pub fn new(destination: impl Into<PathBuf>, format: TelemetryFormat) -> Self {
        Self {
            destination: destination.into(),
            format,
        }
    }

    /// File today's spans go to.
    pub fn current_file(&self) -> PathBuf {
        let extension = match self.format {
            TelemetryFormat::Json => "jsonl",
            TelemetryFormat::Text => "txt",
        };
        self.destination.join(format!(
            "spans-{}.{}",
            Local::now().format("%Y-%m-%d"),
            extension
        ))
    }

    /// Append a batch in the configured format.
    pub fn write_batch(&self, spans: &[TelemetrySpan]) -> Result<()> {
        if !self.destination.exists() {
            fs::create_dir_all(&self.destination).with_context(|| {
                format!("Failed to create telemetry directory {:?}", self.destination)
            })?;
        }

        let content = render_batch(spans, self.format)?;
        let path = self.current_file();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open telemetry file {path:?}"))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write telemetry file {path:?}"))?;
        Ok(())
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl SpanExporter for FileExporter {
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()> {
        self.write_batch(batch)
    }

    fn endpoint(&self) -> String {
        self.destination.display().to_string()
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Prints spans to stdout, or to any writer handed to [`ConsoleExporter::with_writer`].
#[derive(Clone)]
pub struct ConsoleExporter {
    format: TelemetryFormat,
    out: SharedWriter,
}

impl std::fmt::Debug for ConsoleExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleExporter")
            .field("format", &self.format)
            .finish()
    }
}

impl ConsoleExporter {
    pub fn stdout(format: TelemetryFormat) -> Self {
        Self::with_writer(format, io::stdout())
    }

    pub fn with_writer(format: TelemetryFormat, writer: impl Write + Send + 'static) -> Self {
        Self {
            format,
            out: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

#[async_trait]
impl SpanExporter for ConsoleExporter {
    async fn export(&self, batch: &[TelemetrySpan]) -> Result<()> {
        let content = render_batch(batch, self.format)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(content.as_bytes())
            .context("Failed to write spans to console")?;
        out.flush().context("Failed to flush console")?;
        Ok(())
    }

    fn endpoint(&self) -> String {
        "stdout".to_string()
    }
}

/// Render a batch in `format`.
fn render_batch(spans: &[TelemetrySpan], format: TelemetryFormat) -> Result<String> {
    let mut content = String::new();
    for span in spans {
        match format {
            // Newline-terminated for log parsers like Promtail
            TelemetryFormat::Json => {
                content.push_str(&serde_json::to_string(span)?);
                content.push('\n');
            }
            TelemetryFormat::Text => content.push_str(&format_human_readable(span)?),
        }
    }
    Ok(content)
}

fn local_time(unix_nanos: u64) -> DateTime<Local> {
    (UNIX_EPOCH + Duration::from_nanos(unix_nanos)).into()
}

/// Format one span as human-readable text.
fn format_human_readable(span: &TelemetrySpan) -> Result<String> {
    let start = local_time(span.start_time_unix_nano());
    let duration_us =
        span.end_time_unix_nano().saturating_sub(span.start_time_unix_nano()) / 1_000;

    let mut output = String::new();

    // Header
    output.push_str(&format!(
        "===== Span {} [{}] [{}] =====\n",
        span.name(),
        start.format("%Y-%m-%d %H:%M:%S%.3f"),
        span.trace_id()
    ));
    output.push_str(&format!("Span ID: {}\n", span.span_id()));
    match span.parent_span_id() {
        Some(parent) => output.push_str(&format!("Parent: {parent}\n")),
        None => output.push_str("Parent: (root)\n"),
    }
    output.push_str(&format!("Duration: {duration_us}μs\n"));
    match span.status() {
        SpanStatus::Unset => output.push_str("Status: unset\n"),
        SpanStatus::Ok => output.push_str("Status: ok\n"),
        SpanStatus::Error { message } => output.push_str(&format!("Status: ERROR - {message}\n")),
    }

    output.push_str("----- Attributes -----\n");
    for (key, value) in span.attributes().iter() {
        output.push_str(&format!("  {key} = {value}\n"));
    }

    if !span.events().is_empty() {
        output.push_str("----- Events -----\n");
        for (i, event) in span.events().iter().enumerate() {
            output.push_str(&format!("[{}] {}\n", i + 1, event.name));
            for (key, value) in event.attributes.iter() {
                output.push_str(&format!("    {key} = {value}\n"));
            }
        }
    }

    output.push_str("===== End Span =====\n\n");
    Ok(output)
}
