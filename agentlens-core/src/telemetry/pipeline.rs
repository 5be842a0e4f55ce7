//! Fire-and-forget export pipeline.
//!
//! ```text
//! handler thread                     agentlens-export thread
//!   submit(span) --try_send-->  [bounded queue]  --> batch --> exporter
//!                 (full: drop)                   (max_batch or flush_interval)
//! ```
//!
//! Submission never blocks and never fails visibly: a full or closed queue
//! drops the span and counts it. Export errors are logged and counted on the
//! worker; nothing is retried.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{EnrichmentConfig, QueueConfig};
use crate::error::{EnrichmentError, Result};

use super::exporter::{build_exporter, SpanExporter};
use super::span::TelemetrySpan;

enum Command {
    Span(TelemetrySpan),
    Flush(std_mpsc::SyncSender<()>),
    Shutdown(std_mpsc::SyncSender<()>),
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    exported: AtomicU64,
    dropped: AtomicU64,
    export_failures: AtomicU64,
    handler_faults: AtomicU64,
}

impl PipelineStats {
    pub fn record_handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Spans handed to `submit`
    pub submitted: u64,
    /// Spans the exporter accepted
    pub exported: u64,
    /// Spans lost to a full or closed queue
    pub dropped: u64,
    /// Batches the exporter rejected
    pub export_failures: u64,
    /// Enrichment faults caught at the subscriber boundary
    pub handler_faults: u64,
}

/// Bounded span queue plus its export worker.
pub struct TelemetryPipeline {
    sender: mpsc::Sender<Command>,
    stats: Arc<PipelineStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
    endpoint: String,
}

impl std::fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl TelemetryPipeline {
    /// Start a pipeline with the exporter `config` selects.
    pub fn start(config: &EnrichmentConfig) -> Result<Self> {
        let exporter = build_exporter(config)?;
        Self::with_exporter(exporter, &config.queue)
    }

    /// Start a pipeline around an explicit exporter.
    pub fn with_exporter(exporter: Arc<dyn SpanExporter>, queue: &QueueConfig) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(queue.capacity.max(1));
        let stats = Arc::new(PipelineStats::default());
        let endpoint = exporter.endpoint();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| EnrichmentError::PipelineStart { source })?;

        let worker = Worker {
            receiver,
            exporter,
            stats: stats.clone(),
            max_batch: queue.max_batch.max(1),
            flush_interval: Duration::from_millis(queue.flush_interval_ms.max(1)),
        };
        let handle = std::thread::Builder::new()
            .name("agentlens-export".to_string())
            .spawn(move || runtime.block_on(worker.run()))
            .map_err(|source| EnrichmentError::PipelineStart { source })?;

        debug!("Telemetry pipeline started, exporting to {}", endpoint);
        Ok(Self {
            sender,
            stats,
            worker: Mutex::new(Some(handle)),
            endpoint,
        })
    }

    /// Queue a span for export. Returns false if it was dropped.
    pub fn submit(&self, span: TelemetrySpan) -> bool {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(Command::Span(span)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Telemetry queue full, span dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Telemetry pipeline closed, span dropped");
                false
            }
        }
    }

    /// Export everything queued so far. Returns false on timeout.
    ///
    /// Blocks the calling thread for at most `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (ack, done) = std_mpsc::sync_channel(1);
        if !self.send_control(Command::Flush(ack), deadline) {
            return false;
        }
        done.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .is_ok()
    }

    /// Drain the queue and stop the worker. Later submissions are dropped.
    ///
    /// Returns false if the worker did not finish within `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        let (ack, done) = std_mpsc::sync_channel(1);
        if !self.send_control(Command::Shutdown(ack), deadline) {
            warn!("Telemetry pipeline did not accept shutdown within {:?}", timeout);
            *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            return false;
        }
        match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(()) => {
                if handle.join().is_err() {
                    warn!("Telemetry export worker panicked");
                }
                debug!("Telemetry pipeline shut down");
                true
            }
            Err(_) => {
                warn!("Telemetry pipeline shutdown timed out after {:?}", timeout);
                false
            }
        }
    }

    /// Control messages wait for room in the queue, up to `deadline`.
    fn send_control(&self, mut command: Command, deadline: Instant) -> bool {
        loop {
            match self.sender.try_send(command) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    command = returned;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct Worker {
    receiver: mpsc::Receiver<Command>,
    exporter: Arc<dyn SpanExporter>,
    stats: Arc<PipelineStats>,
    max_batch: usize,
    flush_interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut batch: Vec<TelemetrySpan> = Vec::with_capacity(self.max_batch);
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let command = match deadline {
                Some(at) => match tokio::time::timeout_at(at, self.receiver.recv()).await {
                    Ok(command) => command,
                    Err(_) => {
                        self.export(&mut batch).await;
                        deadline = None;
                        continue;
                    }
                },
                None => self.receiver.recv().await,
            };

            match command {
                Some(Command::Span(span)) => {
                    if batch.is_empty() {
                        deadline = Some(tokio::time::Instant::now() + self.flush_interval);
                    }
                    batch.push(span);
                    if batch.len() >= self.max_batch {
                        self.export(&mut batch).await;
                        deadline = None;
                    }
                }
                Some(Command::Flush(ack)) => {
                    self.export(&mut batch).await;
                    deadline = None;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    self.finish(&mut batch).await;
                    let _ = ack.send(());
                    return;
                }
                None => {
                    self.finish(&mut batch).await;
                    return;
                }
            }
        }
    }

    async fn finish(&mut self, batch: &mut Vec<TelemetrySpan>) {
        self.receiver.close();
        while let Ok(command) = self.receiver.try_recv() {
            if let Command::Span(span) = command {
                batch.push(span);
            }
        }
        self.export(batch).await;
        if let Err(e) = self.exporter.shutdown().await {
            warn!("Telemetry exporter shutdown failed: {:#}", e);
        }
    }

    async fn export(&self, batch: &mut Vec<TelemetrySpan>) {
        if batch.is_empty() {
            return;
        }
        let spans = std::mem::take(batch);
        match self.exporter.export(&spans).await {
            Ok(()) => {
                self.stats
                    .exported
                    .fetch_add(spans.len() as u64, Ordering::Relaxed);
                debug!("Exported {} spans to {}", spans.len(), self.exporter.endpoint());
            }
            Err(e) => {
                self.stats.export_failures.fetch_add(1, Ordering::Relaxed);
                EnrichmentError::export_unavailable(self.exporter.endpoint(), e).log();
            }
        }
    }
}
