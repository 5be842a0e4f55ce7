//! Attribute codec
//!
//! Turns unbounded orchestration values (tool catalogs, histories, payloads,
//! results) into span attributes that respect the configured size limits and
//! never carry values under sensitive keys.
//!
//! Truncated text always ends with [`TRUNCATION_MARKER`], and the marker is
//! counted inside the limit.

mod encoders;

pub use encoders::{
    CapabilityEncoder, ContentBlocksEncoder, MessageEncoder, ToolResultEncoder,
};

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::{CaptureLimits, EnrichmentConfig, RedactionConfig};
use crate::error::{EnrichmentError, Result};
use crate::telemetry::AttributeValue;

/// Appended to every truncated value
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Summarizes one recognizable value shape.
///
/// Encoders are tried in registration order; the first whose `matches`
/// returns true produces the summary. An `Err` falls back to generic text.
pub trait ShapeEncoder: Send + Sync {
    /// Short name used in diagnostics
    fn shape(&self) -> &str;

    fn matches(&self, value: &Value) -> bool;

    fn summarize(&self, value: &Value) -> Result<String>;
}

/// Bounded, redacted attribute encoding.
#[derive(Clone)]
pub struct AttributeCodec {
    limits: CaptureLimits,
    sensitive_keys: Vec<Regex>,
    replacement: String,
    encoders: Vec<Arc<dyn ShapeEncoder>>,
}

impl fmt::Debug for AttributeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeCodec")
            .field("limits", &self.limits)
            .field(
                "encoders",
                &self.encoders.iter().map(|e| e.shape()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AttributeCodec {
    /// Codec with the built-in shape encoders.
    pub fn new(limits: CaptureLimits, redaction: &RedactionConfig) -> Result<Self> {
        limits.validate()?;
        let sensitive_keys = redaction
            .key_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    EnrichmentError::InvalidConfig(format!(
                        "bad redaction pattern {pattern:?}: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            limits,
            sensitive_keys,
            replacement: redaction.replacement.clone(),
            encoders: vec![
                Arc::new(MessageEncoder),
                Arc::new(ToolResultEncoder),
                Arc::new(CapabilityEncoder),
                Arc::new(ContentBlocksEncoder),
            ],
        })
    }

    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Self::new(config.limits.clone(), &config.redaction)
    }

    /// Register an encoder ahead of everything already registered.
    pub fn with_encoder(mut self, encoder: Arc<dyn ShapeEncoder>) -> Self {
        self.encoders.insert(0, encoder);
        self
    }

    pub fn limits(&self) -> &CaptureLimits {
        &self.limits
    }

    /// Whether values under `key` must never be captured.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.iter().any(|re| re.is_match(key))
    }

    /// Encode a value as a span attribute.
    pub fn encode(&self, key: &str, value: &Value) -> AttributeValue {
        self.encode_with_limit(key, value, self.limits.max_attribute_bytes)
    }

    /// Encode a value as a sub-event attribute (longer limit).
    pub fn encode_event(&self, key: &str, value: &Value) -> AttributeValue {
        self.encode_with_limit(key, value, self.limits.max_event_attribute_bytes)
    }

    pub fn encode_with_limit(&self, key: &str, value: &Value, limit: usize) -> AttributeValue {
        if self.is_sensitive(key) {
            return AttributeValue::String(self.replacement.clone());
        }
        match value {
            Value::Null => AttributeValue::String("null".to_string()),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::I64(i),
                None => AttributeValue::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => AttributeValue::String(bounded(s, limit)),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
                let items: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                AttributeValue::StringArray(bound_list(&items, limit))
            }
            other => AttributeValue::String(self.json(other, limit)),
        }
    }

    /// Encode a list of strings (tool names and the like).
    pub fn encode_list<S: AsRef<str>>(&self, items: &[S]) -> AttributeValue {
        let items: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
        AttributeValue::StringArray(bound_list(&items, self.limits.max_attribute_bytes))
    }

    /// Bound plain text to `limit` bytes.
    pub fn text(&self, text: &str, limit: usize) -> AttributeValue {
        AttributeValue::String(bounded(text, limit))
    }

    /// Flatten a nested mapping into dotted keys under `prefix`.
    ///
    /// Nesting past `max_flatten_depth` is rendered as JSON text, and at most
    /// `max_context_entries` pairs are produced.
    pub fn encode_fields(&self, prefix: &str, value: &Value) -> Vec<(String, AttributeValue)> {
        let mut out = Vec::new();
        self.flatten(prefix, value, 0, &mut out);
        out
    }

    fn flatten(
        &self,
        key: &str,
        value: &Value,
        depth: usize,
        out: &mut Vec<(String, AttributeValue)>,
    ) {
        if out.len() >= self.limits.max_context_entries {
            debug!("Attribute count limit reached at {}", key);
            return;
        }
        if self.is_sensitive(key) {
            out.push((key.to_string(), AttributeValue::String(self.replacement.clone())));
            return;
        }
        match value {
            Value::Object(map) if !map.is_empty() && depth < self.limits.max_flatten_depth => {
                for (child, child_value) in map {
                    let child_key = if key.is_empty() {
                        child.clone()
                    } else {
                        format!("{key}.{child}")
                    };
                    self.flatten(&child_key, child_value, depth + 1, out);
                }
            }
            other => out.push((key.to_string(), self.encode(key, other))),
        }
    }

    /// Encode a typed value through its serde form.
    pub fn encode_serialized<T>(&self, key: &str, value: &T) -> AttributeValue
    where
        T: Serialize + fmt::Debug,
    {
        match serde_json::to_value(value) {
            Ok(json) => self.encode(key, &json),
            Err(e) => {
                EnrichmentError::UnsupportedShape {
                    shape: std::any::type_name::<T>().to_string(),
                    reason: e.to_string(),
                }
                .log();
                AttributeValue::String(bounded(
                    &format!("{value:?}"),
                    self.limits.max_attribute_bytes,
                ))
            }
        }
    }

    /// Compact JSON of the redacted value, bounded.
    pub fn json(&self, value: &Value, limit: usize) -> String {
        bounded(&self.redact(value).to_string(), limit)
    }

    /// Human-readable preview of a value, bounded by the summary limit.
    pub fn summarize(&self, value: &Value) -> String {
        let limit = self.limits.max_summary_bytes;
        match value {
            Value::Null => return "null".to_string(),
            Value::Bool(b) => return b.to_string(),
            Value::Number(n) => return n.to_string(),
            Value::String(s) => return bounded(s, limit),
            _ => {}
        }

        if let Some(encoder) = self.encoders.iter().find(|e| e.matches(value)) {
            match encoder.summarize(value) {
                Ok(summary) => return bounded(&summary, limit),
                Err(e) => e.log(),
            }
        }

        self.json(value, limit)
    }

    /// Deep copy with values under sensitive keys replaced.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, v)| {
                        let v = if self.is_sensitive(key) {
                            Value::String(self.replacement.clone())
                        } else {
                            self.redact(v)
                        };
                        (key.clone(), v)
                    })
                    .collect::<Map<String, Value>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }
}

/// Largest char boundary at or below `max`.
fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    let mut idx = max;
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Cut `text` to at most `limit` bytes, ending in the marker when cut.
/// Limits shorter than the marker get a plain cut.
pub fn bounded(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    if limit < TRUNCATION_MARKER.len() {
        return text[..floor_char_boundary(text, limit)].to_string();
    }
    let keep = floor_char_boundary(text, limit.saturating_sub(TRUNCATION_MARKER.len()));
    let mut out = String::with_capacity(keep + TRUNCATION_MARKER.len());
    out.push_str(&text[..keep]);
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Keep whole items while they fit; the first item that doesn't is cut and
/// marked, and the rest are dropped. Total bytes never exceed `limit`.
pub fn bound_list(items: &[&str], limit: usize) -> Vec<String> {
    let total: usize = items.iter().map(|s| s.len()).sum();
    if total <= limit {
        return items.iter().map(|s| s.to_string()).collect();
    }

    if limit < TRUNCATION_MARKER.len() {
        let mut out = Vec::new();
        let mut left = limit;
        for item in items {
            let cut = floor_char_boundary(item, left);
            if cut > 0 {
                out.push(item[..cut].to_string());
                left -= cut;
            }
            if cut < item.len() {
                break;
            }
        }
        return out;
    }

    let budget = limit - TRUNCATION_MARKER.len();
    let mut out = Vec::new();
    let mut used = 0;
    for item in items {
        if used + item.len() <= budget {
            out.push(item.to_string());
            used += item.len();
            continue;
        }
        let cut = floor_char_boundary(item, budget - used);
        out.push(format!("{}{}", &item[..cut], TRUNCATION_MARKER));
        break;
    }
    out
}
