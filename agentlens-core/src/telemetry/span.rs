//! Span types for enrichment telemetry.
//!
//! Spans are OTLP-shaped from the start (16-byte trace ids, 8-byte span
//! ids, unix-nano timestamps) so export is a field-by-field copy:
//!
//! ```text
//! TelemetrySpan
//!   ├── trace_id, span_id, parent_span_id
//!   ├── name, kind, start/end_time_unix_nano
//!   ├── attributes: key -> AttributeValue (unique keys)
//!   ├── events: Vec<SpanEvent> (ordered, timestamped)
//!   └── status: Unset | Ok | Error
//! ```
//!
//! A span is assembled in a [`SpanBuilder`] and frozen by
//! [`SpanBuilder::end`]. The resulting [`TelemetrySpan`] only exposes
//! read accessors.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert SystemTime to nanoseconds since Unix epoch.
pub(crate) fn system_time_to_nanos(time: &SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn now_nanos() -> u64 {
    system_time_to_nanos(&SystemTime::now())
}

// ============================================================================
// Identifiers
// ============================================================================

/// 16-byte trace identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// A fresh random trace id.
    ///
    /// The low 8 bytes drive ratio sampling, so they are taken only from
    /// UUID v4 bytes that carry no version or variant bits.
    pub fn random() -> Self {
        let high = *Uuid::new_v4().as_bytes();
        let low = *Uuid::new_v4().as_bytes();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high[..8]);
        bytes[8..14].copy_from_slice(&low[..6]);
        bytes[14..16].copy_from_slice(&low[9..11]);
        TraceId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(bytes)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; 16]
    }

    /// Map an orchestrator-provided id of any format onto a trace id.
    ///
    /// Hex (with or without UUID dashes) is decoded and zero-padded; anything
    /// else is hashed so the same external id always maps to the same trace.
    pub fn from_external(id: &str) -> Self {
        let mut result = [0u8; 16];
        match hex::decode(id.replace('-', "")) {
            Ok(bytes) if !bytes.is_empty() => {
                let len = bytes.len().min(16);
                result[..len].copy_from_slice(&bytes[..len]);
            }
            _ => {
                use sha2::{Digest, Sha256};
                let hash = Sha256::digest(id.as_bytes());
                result.copy_from_slice(&hash[..16]);
            }
        }
        TraceId(result)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl FromStr for TraceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid trace id {s:?}: {e}"))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| format!("trace id {s:?} must be 32 hex characters"))?;
        Ok(TraceId(bytes))
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 8-byte span identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// A fresh span id taken from the random half of a UUID v7.
    pub fn random() -> Self {
        let uuid = Uuid::now_v7();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&uuid.as_bytes()[8..16]);
        SpanId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(bytes)
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; 8]
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

impl FromStr for SpanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid span id {s:?}: {e}"))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| format!("span id {s:?} must be 16 hex characters"))?;
        Ok(SpanId(bytes))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================================================
// Trace Context
// ============================================================================

/// Where in a trace we currently are: the span new children attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Parse a W3C `traceparent` header (`00-<trace>-<span>-<flags>`).
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        // Version 00 has exactly four fields
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if flags.len() != 2 {
            return None;
        }

        let trace_id: TraceId = trace.parse().ok()?;
        let span_id: SpanId = span.parse().ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if !trace_id.is_valid() || !span_id.is_valid() {
            return None;
        }

        Some(Self::new(trace_id, span_id, flags & 0x01 == 0x01))
    }

    /// Format as a W3C `traceparent` header.
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// A bounded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    StringArray(Vec<String>),
}

impl AttributeValue {
    /// Bytes counted against size limits.
    pub fn encoded_len(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::StringArray(items) => items.iter().map(String::len).sum(),
            AttributeValue::Bool(_) => 1,
            AttributeValue::I64(_) | AttributeValue::F64(_) => 8,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::I64(v) => write!(f, "{v}"),
            AttributeValue::F64(v) => write!(f, "{v}"),
            AttributeValue::StringArray(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        AttributeValue::I64(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::StringArray(value)
    }
}

/// Attribute map with unique keys, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (key, value) in iter {
            attributes.insert(key, value);
        }
        attributes
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> Extend<(K, V)> for Attributes {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// ============================================================================
// Span Pieces
// ============================================================================

/// OTLP span kind. Enrichment spans are internal unless told otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
}

/// Span outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error { message: String },
}

/// Timestamped sub-event inside a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: Attributes,
}

// ============================================================================
// Builder
// ============================================================================

/// An open span owned by the enrichment layer.
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    name: String,
    kind: SpanKind,
    context: TraceContext,
    parent_span_id: Option<SpanId>,
    start_time_unix_nano: u64,
    attributes: Attributes,
    events: Vec<SpanEvent>,
    status: SpanStatus,
}

impl SpanBuilder {
    /// Start a span under `parent`, or as the root of a new trace.
    pub fn start(name: impl Into<String>, parent: Option<&TraceContext>) -> Self {
        let (trace_id, parent_span_id, sampled) = match parent {
            Some(ctx) => (ctx.trace_id, Some(ctx.span_id), ctx.sampled),
            None => (TraceId::random(), None, true),
        };
        Self {
            name: name.into(),
            kind: SpanKind::Internal,
            context: TraceContext::new(trace_id, SpanId::random(), sampled),
            parent_span_id,
            start_time_unix_nano: now_nanos(),
            attributes: Attributes::new(),
            events: Vec::new(),
            status: SpanStatus::Unset,
        }
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Context children of this span should use.
    pub fn context(&self) -> TraceContext {
        self.context
    }

    pub fn set_sampled(&mut self, sampled: bool) {
        self.context.sampled = sampled;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key, value);
    }

    pub fn set_attributes<K, V, I>(&mut self, attributes: I)
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.attributes.extend(attributes);
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        self.events.push(SpanEvent {
            name: name.into(),
            time_unix_nano: now_nanos(),
            attributes,
        });
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// Mark the span failed and attach an `exception` event.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.add_event(
            "exception",
            Attributes::new()
                .with("exception.type", "ToolError")
                .with("exception.message", message.clone()),
        );
        self.status = SpanStatus::Error { message };
    }

    /// Close the span. Nothing can change it afterwards.
    pub fn end(self) -> TelemetrySpan {
        let end = now_nanos().max(self.start_time_unix_nano);
        TelemetrySpan {
            name: self.name,
            kind: self.kind,
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.parent_span_id,
            sampled: self.context.sampled,
            start_time_unix_nano: self.start_time_unix_nano,
            end_time_unix_nano: end,
            attributes: self.attributes,
            events: self.events,
            status: self.status,
        }
    }
}

// ============================================================================
// Closed Span
// ============================================================================

/// A closed span, ready for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySpan {
    name: String,
    kind: SpanKind,
    trace_id: TraceId,
    span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<SpanId>,
    #[serde(skip)]
    sampled: bool,
    start_time_unix_nano: u64,
    end_time_unix_nano: u64,
    attributes: Attributes,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<SpanEvent>,
    status: SpanStatus,
}

impl TelemetrySpan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn context(&self) -> TraceContext {
        TraceContext::new(self.trace_id, self.span_id, self.sampled)
    }

    pub fn start_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano
    }

    pub fn end_time_unix_nano(&self) -> u64 {
        self.end_time_unix_nano
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    /// First event with the given name.
    pub fn event(&self, name: &str) -> Option<&SpanEvent> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn status(&self) -> &SpanStatus {
        &self.status
    }
}

// ============================================================================
// Tests
// ============================================================================
