//! ContextCorrelator - tracks where each invocation currently is in its trace.
//!
//! ## Lifecycle
//!
//! 1. `begin()` when an invocation starts, with the orchestrator's own context if any
//! 2. `current_context()` before each span, to find its parent
//! 3. `advance()` after each span, so the next one nests under it
//! 4. `end()` when the invocation is over
//!
//! The result is a strict chain per invocation: every enrichment span is the
//! child of the one before it, and the first is the child of the
//! orchestrator's context (or a new root when there is none).
//!
//! State is keyed by [`InvocationId`], so concurrent invocations never see
//! each other's context. Invocations that never end are evicted oldest-first
//! once `max_tracked` is reached.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::hooks::InvocationId;

use super::span::TraceContext;

#[derive(Debug, Default)]
struct InvocationState {
    /// Context supplied by the orchestrator at invocation start
    ambient: Option<TraceContext>,
    /// Most recent enrichment span
    tip: Option<TraceContext>,
    /// Capability snapshot: name -> description
    capabilities: HashMap<String, String>,
    /// Insertion order, for eviction
    seq: u64,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    invocations: HashMap<InvocationId, InvocationState>,
    next_seq: u64,
}

impl CorrelatorState {
    fn entry(&mut self, invocation: InvocationId, max_tracked: usize) -> &mut InvocationState {
        if !self.invocations.contains_key(&invocation) && self.invocations.len() >= max_tracked {
            let oldest = self
                .invocations
                .iter()
                .min_by_key(|(_, state)| state.seq)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                debug!("Correlator full, evicting invocation {}", oldest);
                self.invocations.remove(&oldest);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.invocations
            .entry(invocation)
            .or_insert_with(|| InvocationState {
                seq,
                ..Default::default()
            })
    }
}

/// Per-invocation trace correlation.
#[derive(Debug)]
pub struct ContextCorrelator {
    max_tracked: usize,
    state: Mutex<CorrelatorState>,
}

impl ContextCorrelator {
    pub fn new(max_tracked: usize) -> Self {
        Self {
            max_tracked: max_tracked.max(1),
            state: Mutex::new(CorrelatorState::default()),
        }
    }

    // A panic while holding the lock must not wedge later invocations.
    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking an invocation.
    ///
    /// Calling this again for a live invocation (a second turn) keeps its
    /// chain; the ambient context is only taken the first time.
    pub fn begin(&self, invocation: InvocationId, ambient: Option<TraceContext>) {
        let mut state = self.lock();
        let entry = state.entry(invocation, self.max_tracked);
        if entry.ambient.is_none() {
            entry.ambient = ambient;
        }
    }

    /// Parent for the next span of `invocation`, or `None` to start a new trace.
    pub fn current_context(&self, invocation: InvocationId) -> Option<TraceContext> {
        let state = self.lock();
        let entry = state.invocations.get(&invocation)?;
        entry.tip.or(entry.ambient)
    }

    /// Record the span just emitted as the new chain tip.
    pub fn advance(&self, invocation: InvocationId, context: TraceContext) {
        let mut state = self.lock();
        state.entry(invocation, self.max_tracked).tip = Some(context);
    }

    /// Remember the capabilities offered in this invocation.
    pub fn record_capabilities<I, N, D>(&self, invocation: InvocationId, capabilities: I)
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        let mut state = self.lock();
        let entry = state.entry(invocation, self.max_tracked);
        entry.capabilities = capabilities
            .into_iter()
            .map(|(name, description)| (name.into(), description.into()))
            .collect();
    }

    /// Description of a capability offered in this invocation, if it was offered.
    pub fn capability(&self, invocation: InvocationId, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .invocations
            .get(&invocation)?
            .capabilities
            .get(name)
            .cloned()
    }

    /// Forget an invocation. Returns false if it was not tracked.
    pub fn end(&self, invocation: InvocationId) -> bool {
        self.lock().invocations.remove(&invocation).is_some()
    }

    /// Number of invocations currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().invocations.len()
    }
}
