//! One-call setup: exporter, service identity, sampling, attachment.
//!
//! ```no_run
//! use agentlens_core::{setup, EnrichmentConfig, HookRegistry};
//!
//! let hooks = HookRegistry::new();
//! let config = EnrichmentConfig::new("smart-cli-assistant")
//!     .with_endpoint("http://localhost:4318")
//!     .with_static_attribute("environment", "development");
//! let handle = setup(&hooks, config).expect("valid config");
//! // ... run the orchestrator ...
//! handle.shutdown(std::time::Duration::from_secs(5));
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EnrichmentConfig;
use crate::enrich::Enricher;
use crate::error::Result;
use crate::hooks::Orchestrator;
use crate::subscriber::{self, EnrichmentHandle};
use crate::telemetry::{SpanExporter, TelemetryPipeline};

/// Set up enrichment on `orchestrator`.
///
/// `OTEL_*` environment variables override `config`. Calling this again on
/// an orchestrator that is already enriched returns the existing handle and
/// starts nothing new. Only configuration problems are reported as errors.
pub fn setup<O>(orchestrator: &O, config: EnrichmentConfig) -> Result<EnrichmentHandle>
where
    O: Orchestrator + ?Sized,
{
    let config = config.with_env_overrides();
    config.validate()?;

    if let Some(handle) = already_attached(orchestrator) {
        return Ok(handle);
    }

    let pipeline = Arc::new(TelemetryPipeline::start(&config)?);
    attach_pipeline(orchestrator, &config, pipeline)
}

/// Set up enrichment with an explicit exporter. The environment is not consulted.
pub fn setup_with_exporter<O>(
    orchestrator: &O,
    config: EnrichmentConfig,
    exporter: Arc<dyn SpanExporter>,
) -> Result<EnrichmentHandle>
where
    O: Orchestrator + ?Sized,
{
    config.validate()?;

    if let Some(handle) = already_attached(orchestrator) {
        return Ok(handle);
    }

    let pipeline = Arc::new(TelemetryPipeline::with_exporter(exporter, &config.queue)?);
    attach_pipeline(orchestrator, &config, pipeline)
}

fn already_attached<O>(orchestrator: &O) -> Option<EnrichmentHandle>
where
    O: Orchestrator + ?Sized,
{
    let handle = EnrichmentHandle::existing(orchestrator.hooks())?;
    warn!("Trace enrichment is already set up on this orchestrator, reusing it");
    Some(handle)
}

fn attach_pipeline<O>(
    orchestrator: &O,
    config: &EnrichmentConfig,
    pipeline: Arc<TelemetryPipeline>,
) -> Result<EnrichmentHandle>
where
    O: Orchestrator + ?Sized,
{
    let enricher = Arc::new(Enricher::new(config, pipeline.clone())?);
    let handle = subscriber::attach(orchestrator.hooks(), enricher.clone());

    if Arc::ptr_eq(handle.enricher(), &enricher) {
        info!(
            "Trace enrichment initialized: service={} exporter={}",
            config.service_name,
            pipeline.endpoint()
        );
    } else {
        // Another setup attached first; ours is surplus
        pipeline.shutdown(Duration::from_secs(1));
    }
    Ok(handle)
}
