//! Lifecycle subscriber
//!
//! Registers one callback per lifecycle event kind on an orchestrator's
//! [`HookRegistry`]. Every callback runs enrichment inside a failure
//! boundary: an error or panic is logged, counted, and swallowed, and the
//! orchestrator continues exactly as if nothing was attached.
//!
//! Attaching is idempotent per registry. A second attach finds the provider
//! installed under [`PROVIDER_ID`] and returns a handle to it instead of
//! registering duplicate callbacks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::enrich::Enricher;
use crate::error::EnrichmentError;
use crate::hooks::{CallbackId, HookRegistry, LifecycleEvent, LifecycleEventKind};
use crate::telemetry::PipelineStatsSnapshot;

/// Provider id marking a registry as enriched
pub const PROVIDER_ID: &str = "agentlens.enrichment";

struct Attachment {
    enricher: Arc<Enricher>,
    callbacks: Mutex<Vec<CallbackId>>,
}

/// Attach `enricher` to `registry`, or return the attachment already there.
pub fn attach(registry: &HookRegistry, enricher: Arc<Enricher>) -> EnrichmentHandle {
    let (attachment, created) = registry.install_provider(PROVIDER_ID, || Attachment {
        enricher: enricher.clone(),
        callbacks: Mutex::new(Vec::new()),
    });
    let handle = EnrichmentHandle {
        registry: registry.clone(),
        attachment,
    };

    if !created {
        warn!("Trace enrichment is already attached to this orchestrator, keeping the existing attachment");
        return handle;
    }

    let ids: Vec<CallbackId> = LifecycleEventKind::ALL
        .iter()
        .map(|&kind| {
            let enricher = enricher.clone();
            registry.add_callback(kind, move |event| dispatch_guarded(&enricher, event))
        })
        .collect();
    debug!("Registered {} enrichment callbacks", ids.len());
    *handle
        .attachment
        .callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = ids;

    handle
}

fn dispatch_guarded(enricher: &Enricher, event: &LifecycleEvent<'_>) {
    let handler = event.kind().as_str();
    let fault = match panic::catch_unwind(AssertUnwindSafe(|| enricher.handle(event))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => EnrichmentError::HandlerFault {
            handler,
            detail: e.to_string(),
        },
        Err(payload) => EnrichmentError::HandlerFault {
            handler,
            detail: panic_message(payload.as_ref()),
        },
    };
    enricher.pipeline().stats_handle().record_handler_fault();
    fault.log();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Control over one enrichment attachment. Clones refer to the same one.
#[derive(Clone)]
pub struct EnrichmentHandle {
    registry: HookRegistry,
    attachment: Arc<Attachment>,
}

impl std::fmt::Debug for EnrichmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentHandle")
            .field("attached", &self.is_attached())
            .field("enricher", &self.attachment.enricher)
            .finish()
    }
}

impl EnrichmentHandle {
    /// Handle to the attachment already on `registry`, if any.
    pub fn existing(registry: &HookRegistry) -> Option<Self> {
        registry
            .provider::<Attachment>(PROVIDER_ID)
            .map(|attachment| EnrichmentHandle {
                registry: registry.clone(),
                attachment,
            })
    }

    /// Whether this attachment is still installed.
    pub fn is_attached(&self) -> bool {
        self.registry
            .provider::<Attachment>(PROVIDER_ID)
            .is_some_and(|installed| Arc::ptr_eq(&installed, &self.attachment))
    }

    /// Remove the callbacks. Safe to call more than once.
    pub fn detach(&self) -> bool {
        let ids = std::mem::take(
            &mut *self
                .attachment
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in &ids {
            self.registry.remove_callback(*id);
        }
        let attached = self.is_attached();
        if attached {
            self.registry.remove_provider(PROVIDER_ID);
            info!("Trace enrichment detached");
        }
        attached
    }

    /// Export queued spans. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.attachment.enricher.pipeline().flush(timeout)
    }

    /// Detach, drain the queue and stop the export worker.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.detach();
        self.attachment.enricher.pipeline().shutdown(timeout)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.attachment.enricher.pipeline().stats()
    }

    pub fn enricher(&self) -> &Arc<Enricher> {
        &self.attachment.enricher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrichmentConfig;
    use crate::hooks::{AfterInvocationEvent, InvocationId};
    use crate::telemetry::{InMemoryExporter, TelemetryPipeline};

    fn enricher() -> Arc<Enricher> {
        let config = EnrichmentConfig::default();
        let pipeline = TelemetryPipeline::with_exporter(
            Arc::new(InMemoryExporter::new()),
            &config.queue,
        )
        .unwrap();
        Arc::new(Enricher::new(&config, Arc::new(pipeline)).unwrap())
    }

    #[test]
    fn test_attach_registers_all_kinds() {
        let registry = HookRegistry::new();
        let handle = attach(&registry, enricher());
        assert!(handle.is_attached());
        assert_eq!(registry.callback_count(), LifecycleEventKind::ALL.len());
    }

    #[test]
    fn test_second_attach_is_noop() {
        let registry = HookRegistry::new();
        let first = attach(&registry, enricher());
        let second = attach(&registry, enricher());
        assert_eq!(registry.callback_count(), LifecycleEventKind::ALL.len());
        assert!(Arc::ptr_eq(first.enricher(), second.enricher()));
    }

    #[test]
    fn test_detach_then_reattach() {
        let registry = HookRegistry::new();
        let handle = attach(&registry, enricher());
        assert!(handle.detach());
        assert!(!handle.detach());
        assert!(!handle.is_attached());
        assert_eq!(registry.callback_count(), 0);
        assert!(EnrichmentHandle::existing(&registry).is_none());

        let again = attach(&registry, enricher());
        assert!(again.is_attached());
        assert_eq!(registry.callback_count(), LifecycleEventKind::ALL.len());
    }

    #[test]
    fn test_after_invocation_releases_state() {
        let registry = HookRegistry::new();
        let handle = attach(&registry, enricher());
        let invocation = InvocationId::new();
        handle.enricher().correlator().begin(invocation, None);

        registry.dispatch(&LifecycleEvent::AfterInvocation(AfterInvocationEvent {
            invocation,
        }));
        assert_eq!(handle.enricher().correlator().tracked(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panicked: bang");
    }
}
