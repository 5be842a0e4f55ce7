//! Orchestrator lifecycle hooks
//!
//! The event bus an orchestrator exposes to observers. Observers register
//! callbacks per [`LifecycleEventKind`]; the orchestrator calls
//! [`HookRegistry::dispatch`] at each point of its control loop. Payloads are
//! borrowed from the orchestrator for the duration of the call only.

pub mod accessor;
pub mod events;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

pub use accessor::{FieldReader, Source};
pub use events::{
    AfterInvocationEvent, AfterModelCallEvent, AfterToolCallEvent, AgentSnapshot,
    BeforeInvocationEvent, BeforeToolCallEvent, CapabilityDescriptor, ContentBlock, Message, Role,
    ToolResult, ToolResultContent, ToolResultStatus, ToolUse,
};

/// Identifies one orchestrator invocation (one user request, many turns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Time-ordered id (UUID v7)
    pub fn new() -> Self {
        InvocationId(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        InvocationId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Points in the orchestrator's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    BeforeInvocation,
    AfterModelCall,
    BeforeToolCall,
    AfterToolCall,
    AfterInvocation,
}

impl LifecycleEventKind {
    pub const ALL: [LifecycleEventKind; 5] = [
        LifecycleEventKind::BeforeInvocation,
        LifecycleEventKind::AfterModelCall,
        LifecycleEventKind::BeforeToolCall,
        LifecycleEventKind::AfterToolCall,
        LifecycleEventKind::AfterInvocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::BeforeInvocation => "before_invocation",
            LifecycleEventKind::AfterModelCall => "after_model_call",
            LifecycleEventKind::BeforeToolCall => "before_tool_call",
            LifecycleEventKind::AfterToolCall => "after_tool_call",
            LifecycleEventKind::AfterInvocation => "after_invocation",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace(['_', '-'], "").to_lowercase();
        LifecycleEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('_', "") == normalized)
            .ok_or_else(|| {
                format!(
                    "Unknown lifecycle event: '{s}'. Valid options: {}",
                    LifecycleEventKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// A lifecycle notification with its borrowed payload
#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent<'a> {
    BeforeInvocation(BeforeInvocationEvent<'a>),
    AfterModelCall(AfterModelCallEvent<'a>),
    BeforeToolCall(BeforeToolCallEvent<'a>),
    AfterToolCall(AfterToolCallEvent<'a>),
    AfterInvocation(AfterInvocationEvent),
}

impl LifecycleEvent<'_> {
    pub fn kind(&self) -> LifecycleEventKind {
        match self {
            LifecycleEvent::BeforeInvocation(_) => LifecycleEventKind::BeforeInvocation,
            LifecycleEvent::AfterModelCall(_) => LifecycleEventKind::AfterModelCall,
            LifecycleEvent::BeforeToolCall(_) => LifecycleEventKind::BeforeToolCall,
            LifecycleEvent::AfterToolCall(_) => LifecycleEventKind::AfterToolCall,
            LifecycleEvent::AfterInvocation(_) => LifecycleEventKind::AfterInvocation,
        }
    }

    pub fn invocation(&self) -> InvocationId {
        match self {
            LifecycleEvent::BeforeInvocation(e) => e.invocation,
            LifecycleEvent::AfterModelCall(e) => e.invocation,
            LifecycleEvent::BeforeToolCall(e) => e.invocation,
            LifecycleEvent::AfterToolCall(e) => e.invocation,
            LifecycleEvent::AfterInvocation(e) => e.invocation,
        }
    }
}

/// Handle for a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Arc<dyn Fn(&LifecycleEvent<'_>) + Send + Sync>;
type Provider = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    callbacks: Mutex<Vec<(CallbackId, LifecycleEventKind, Callback)>>,
    providers: Mutex<HashMap<String, Provider>>,
    next_id: AtomicU64,
}

/// The orchestrator's event bus.
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct HookRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `kind`.
    pub fn add_callback<F>(&self, kind: LifecycleEventKind, callback: F) -> CallbackId
    where
        F: Fn(&LifecycleEvent<'_>) + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(cid, _, _)| *cid != id);
        callbacks.len() != before
    }

    pub fn callback_count(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every callback registered for the event's kind, in registration order.
    ///
    /// The list is snapshotted first, so callbacks may add or remove
    /// callbacks without deadlocking.
    pub fn dispatch(&self, event: &LifecycleEvent<'_>) {
        let kind = event.kind();
        let matching: Vec<Callback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();

        for callback in matching {
            callback(event);
        }
    }

    /// Install a provider under `id` unless one is already there.
    ///
    /// Returns the installed provider and whether it was created by this call.
    pub fn install_provider<T, F>(&self, id: &str, make: F) -> (Arc<T>, bool)
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut providers = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = providers.get(id) {
            if let Ok(existing) = Arc::clone(existing).downcast::<T>() {
                return (existing, false);
            }
        }
        let provider = Arc::new(make());
        providers.insert(id.to_string(), provider.clone() as Provider);
        (provider, true)
    }

    /// Look up an installed provider.
    pub fn provider<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        let providers = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        providers
            .get(id)
            .and_then(|p| Arc::clone(p).downcast::<T>().ok())
    }

    /// Remove a provider. Returns false if none was installed.
    pub fn remove_provider(&self, id: &str) -> bool {
        self.inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

/// Anything exposing a lifecycle event bus.
pub trait Orchestrator {
    fn hooks(&self) -> &HookRegistry;
}

impl Orchestrator for HookRegistry {
    fn hooks(&self) -> &HookRegistry {
        self
    }
}
