//! Enrichment configuration
//!
//! Captured once at setup and never mutated afterwards; replacing it means
//! running setup again.
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. Standard OpenTelemetry environment variables (`OTEL_*`)
//! 2. A config file passed to [`EnrichmentConfig::load_from_file`]
//! 3. Built-in defaults
//!
//! ## File Syntax
//!
//! ```yaml
//! service_name: smart-cli-assistant
//! exporter:
//!   kind: otlp
//!   endpoint: http://localhost:4318
//! sampler:
//!   kind: parent_based
//!   ratio: 0.25
//! static_attributes:
//!   environment: development
//!   user.id: demo-user
//! limits:
//!   max_attribute_bytes: 1000
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{EnrichmentError, Result};

/// Default OTLP/HTTP collector endpoint
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Smallest attribute limit accepted; the truncation marker must always fit.
pub const MIN_ATTRIBUTE_BYTES: usize = 64;

/// Top-level enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Service identity reported on every export
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Optional service version (resource attribute `service.version`)
    #[serde(default)]
    pub service_version: Option<String>,

    /// Where spans go
    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Also print every exported span to stdout in this format
    #[serde(default)]
    pub console: Option<TelemetryFormat>,

    /// Which traces are kept
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Attributes merged into every emitted span
    #[serde(default)]
    pub static_attributes: BTreeMap<String, Value>,

    /// Extra resource attributes (from `OTEL_RESOURCE_ATTRIBUTES` or the file)
    #[serde(default)]
    pub resource_attributes: BTreeMap<String, String>,

    /// Byte and count limits for captured text
    #[serde(default)]
    pub limits: CaptureLimits,

    /// Keys whose values are never captured
    #[serde(default)]
    pub redaction: RedactionConfig,

    /// Source-side field names for loosely-typed payloads
    #[serde(default)]
    pub fields: FieldAliases,

    /// Export queue sizing
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: None,
            exporter: ExporterConfig::default(),
            console: None,
            sampler: SamplerConfig::default(),
            static_attributes: BTreeMap::new(),
            resource_attributes: BTreeMap::new(),
            limits: CaptureLimits::default(),
            redaction: RedactionConfig::default(),
            fields: FieldAliases::default(),
            queue: QueueConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "agent-orchestrator".to_string()
}

/// Exporter selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExporterConfig {
    /// OTLP over HTTP with protobuf payloads
    Otlp {
        /// Base endpoint; `/v1/traces` is appended
        #[serde(default = "default_endpoint")]
        endpoint: String,

        /// Full traces URL, used as-is when set
        #[serde(default)]
        traces_endpoint: Option<String>,

        /// Extra request headers (e.g. auth for a hosted collector)
        #[serde(default)]
        headers: BTreeMap<String, String>,

        /// Per-request timeout in milliseconds
        #[serde(default = "default_export_timeout_ms")]
        timeout_ms: u64,
    },

    /// Span files on local disk
    File {
        destination: PathBuf,
        #[serde(default)]
        format: TelemetryFormat,
    },

    /// Spans printed to stdout
    Console {
        #[serde(default = "default_console_format")]
        format: TelemetryFormat,
    },

    /// Spans are built and discarded
    None,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig::Otlp {
            endpoint: default_endpoint(),
            traces_endpoint: None,
            headers: BTreeMap::new(),
            timeout_ms: default_export_timeout_ms(),
        }
    }
}

impl ExporterConfig {
    /// The URL (or path) spans are sent to, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            ExporterConfig::Otlp {
                endpoint,
                traces_endpoint,
                ..
            } => traces_url(endpoint, traces_endpoint.as_deref()),
            ExporterConfig::File { destination, .. } => destination.display().to_string(),
            ExporterConfig::Console { .. } => "stdout".to_string(),
            ExporterConfig::None => "none".to_string(),
        }
    }
}

/// Resolve the OTLP traces URL from a base endpoint or an explicit override.
pub fn traces_url(endpoint: &str, traces_endpoint: Option<&str>) -> String {
    match traces_endpoint {
        Some(url) => url.to_string(),
        None => format!("{}/v1/traces", endpoint.trim_end_matches('/')),
    }
}

fn default_endpoint() -> String {
    DEFAULT_OTLP_ENDPOINT.to_string()
}

fn default_console_format() -> TelemetryFormat {
    TelemetryFormat::Text
}

fn default_export_timeout_ms() -> u64 {
    10_000
}

/// File output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    /// One JSON span per line
    #[default]
    Json,
    /// Human-readable blocks
    Text,
}

/// Sampling policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerConfig {
    AlwaysOn,
    AlwaysOff,
    /// Keep a deterministic fraction of traces by trace id
    TraceIdRatio { ratio: f64 },
    /// Follow the orchestrator's decision when it supplied a context, else use the ratio
    ParentBased {
        #[serde(default = "default_ratio")]
        ratio: f64,
    },
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::ParentBased {
            ratio: default_ratio(),
        }
    }
}

fn default_ratio() -> f64 {
    1.0
}

/// Byte and count limits for captured orchestration state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureLimits {
    /// Max bytes of any span attribute value
    #[serde(default = "default_attribute_bytes")]
    pub max_attribute_bytes: usize,

    /// Max bytes of any sub-event attribute value (full payloads live here)
    #[serde(default = "default_event_attribute_bytes")]
    pub max_event_attribute_bytes: usize,

    /// Max bytes of a capability description
    #[serde(default = "default_description_bytes")]
    pub max_description_bytes: usize,

    /// Max bytes of a human-readable summary
    #[serde(default = "default_summary_bytes")]
    pub max_summary_bytes: usize,

    /// How many trailing history entries get their own sub-event
    #[serde(default = "default_history_events")]
    pub max_history_events: usize,

    /// Max `context.*` attributes taken from agent state
    #[serde(default = "default_context_entries")]
    pub max_context_entries: usize,

    /// Nesting depth flattened into dotted keys before falling back to JSON text
    #[serde(default = "default_flatten_depth")]
    pub max_flatten_depth: usize,

    /// Invocations tracked at once by the correlator
    #[serde(default = "default_tracked_invocations")]
    pub max_tracked_invocations: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_attribute_bytes: default_attribute_bytes(),
            max_event_attribute_bytes: default_event_attribute_bytes(),
            max_description_bytes: default_description_bytes(),
            max_summary_bytes: default_summary_bytes(),
            max_history_events: default_history_events(),
            max_context_entries: default_context_entries(),
            max_flatten_depth: default_flatten_depth(),
            max_tracked_invocations: default_tracked_invocations(),
        }
    }
}

impl CaptureLimits {
    /// Reject byte limits too small to hold a truncation marker.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_attribute_bytes", self.max_attribute_bytes),
            ("max_event_attribute_bytes", self.max_event_attribute_bytes),
            ("max_description_bytes", self.max_description_bytes),
            ("max_summary_bytes", self.max_summary_bytes),
        ] {
            if value < MIN_ATTRIBUTE_BYTES {
                return Err(EnrichmentError::InvalidConfig(format!(
                    "limits.{name} must be at least {MIN_ATTRIBUTE_BYTES} (got {value})"
                )));
            }
        }
        if self.max_tracked_invocations == 0 {
            return Err(EnrichmentError::InvalidConfig(
                "limits.max_tracked_invocations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_attribute_bytes() -> usize {
    1000
}

fn default_event_attribute_bytes() -> usize {
    2000
}

fn default_description_bytes() -> usize {
    500
}

fn default_summary_bytes() -> usize {
    200
}

fn default_history_events() -> usize {
    5
}

fn default_context_entries() -> usize {
    32
}

fn default_flatten_depth() -> usize {
    4
}

fn default_tracked_invocations() -> usize {
    1024
}

/// Redaction policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Regex patterns matched against attribute and mapping keys
    #[serde(default = "default_redaction_patterns")]
    pub key_patterns: Vec<String>,

    /// Text stored instead of a sensitive value
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            key_patterns: default_redaction_patterns(),
            replacement: default_replacement(),
        }
    }
}

fn default_redaction_patterns() -> Vec<String> {
    vec![
        "(?i)password".to_string(),
        "(?i)secret".to_string(),
        "(?i)(^|[_.-])token$".to_string(),
        "(?i)api[_-]?key".to_string(),
        "(?i)authorization".to_string(),
    ]
}

fn default_replacement() -> String {
    "[REDACTED]".to_string()
}

/// Source-side names tried, in order, when a payload arrives as a mapping.
///
/// Orchestrator versions disagree on field names (`toolUseId` vs
/// `tool_use_id`, `content` vs `result`), so each logical field carries a
/// list instead of one name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAliases {
    #[serde(default = "aliases_tools")]
    pub tools: Vec<String>,
    #[serde(default = "aliases_tool_names")]
    pub tool_names: Vec<String>,
    #[serde(default = "aliases_messages")]
    pub messages: Vec<String>,
    #[serde(default = "aliases_system_prompt")]
    pub system_prompt: Vec<String>,
    #[serde(default = "aliases_state")]
    pub state: Vec<String>,
    #[serde(default = "aliases_name")]
    pub name: Vec<String>,
    #[serde(default = "aliases_description")]
    pub description: Vec<String>,
    #[serde(default = "aliases_input_schema")]
    pub input_schema: Vec<String>,
    #[serde(default = "aliases_role")]
    pub role: Vec<String>,
    #[serde(default = "aliases_content")]
    pub content: Vec<String>,
    #[serde(default = "aliases_tool_use_id")]
    pub tool_use_id: Vec<String>,
    #[serde(default = "aliases_tool_input")]
    pub tool_input: Vec<String>,
    #[serde(default = "aliases_status")]
    pub status: Vec<String>,
    #[serde(default = "aliases_result")]
    pub result: Vec<String>,
    #[serde(default = "aliases_error")]
    pub error: Vec<String>,
    #[serde(default = "aliases_stop_reason")]
    pub stop_reason: Vec<String>,
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            tools: aliases_tools(),
            tool_names: aliases_tool_names(),
            messages: aliases_messages(),
            system_prompt: aliases_system_prompt(),
            state: aliases_state(),
            name: aliases_name(),
            description: aliases_description(),
            input_schema: aliases_input_schema(),
            role: aliases_role(),
            content: aliases_content(),
            tool_use_id: aliases_tool_use_id(),
            tool_input: aliases_tool_input(),
            status: aliases_status(),
            result: aliases_result(),
            error: aliases_error(),
            stop_reason: aliases_stop_reason(),
        }
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn aliases_tools() -> Vec<String> {
    names(&["tools", "tool_specs", "toolSpecs", "tool_config"])
}

fn aliases_tool_names() -> Vec<String> {
    names(&["tool_names", "toolNames"])
}

fn aliases_messages() -> Vec<String> {
    names(&["messages", "history", "conversation"])
}

fn aliases_system_prompt() -> Vec<String> {
    names(&["system_prompt", "systemPrompt", "system"])
}

fn aliases_state() -> Vec<String> {
    names(&["state", "context"])
}

fn aliases_name() -> Vec<String> {
    names(&["name", "tool_name", "toolName"])
}

fn aliases_description() -> Vec<String> {
    names(&["description", "doc"])
}

fn aliases_input_schema() -> Vec<String> {
    names(&["inputSchema", "input_schema", "parameters"])
}

fn aliases_role() -> Vec<String> {
    names(&["role"])
}

fn aliases_content() -> Vec<String> {
    names(&["content", "text"])
}

fn aliases_tool_use_id() -> Vec<String> {
    names(&["toolUseId", "tool_use_id", "id"])
}

fn aliases_tool_input() -> Vec<String> {
    names(&["input", "tool_input", "arguments"])
}

fn aliases_status() -> Vec<String> {
    names(&["status"])
}

fn aliases_result() -> Vec<String> {
    names(&["content", "result", "output", "tool_response"])
}

fn aliases_error() -> Vec<String> {
    names(&["error", "exception", "error_message"])
}

fn aliases_stop_reason() -> Vec<String> {
    names(&["stop_reason", "stopReason"])
}

/// Export queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Spans buffered before new ones are dropped
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Spans per export request
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// How long a partial batch waits before export, in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_batch: default_max_batch(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_capacity() -> usize {
    2048
}

fn default_max_batch() -> usize {
    512
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl EnrichmentConfig {
    /// Defaults with the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Send spans to an OTLP collector at `endpoint`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        match &mut self.exporter {
            ExporterConfig::Otlp {
                endpoint: current, ..
            } => *current = endpoint,
            other => {
                *other = ExporterConfig::Otlp {
                    endpoint,
                    traces_endpoint: None,
                    headers: BTreeMap::new(),
                    timeout_ms: default_export_timeout_ms(),
                }
            }
        }
        self
    }

    /// Replace the exporter.
    pub fn with_exporter(mut self, exporter: ExporterConfig) -> Self {
        self.exporter = exporter;
        self
    }

    /// Mirror exported spans to stdout alongside the configured exporter.
    pub fn with_console(mut self, format: TelemetryFormat) -> Self {
        self.console = Some(format);
        self
    }

    /// Replace the sampler.
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    /// Add an attribute merged into every span.
    pub fn with_static_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.static_attributes.insert(key.into(), value.into());
        self
    }

    /// Replace the capture limits.
    pub fn with_limits(mut self, limits: CaptureLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Load a config file. YAML and JSON are both accepted.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| EnrichmentError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .map_err(|source| EnrichmentError::ConfigParse { source })?;
        debug!("Loaded enrichment config from {:?}", path);
        Ok(config)
    }

    /// Overlay the standard `OTEL_*` process environment.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay `OTEL_*` settings read through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get("OTEL_SERVICE_NAME") {
            self.service_name = name;
        }

        if let Some(attrs) = get("OTEL_RESOURCE_ATTRIBUTES") {
            for (key, value) in parse_key_value_list(&attrs) {
                if key == "service.name" && lookup("OTEL_SERVICE_NAME").is_none() {
                    self.service_name = value.clone();
                }
                self.resource_attributes.insert(key, value);
            }
        }

        if let ExporterConfig::Otlp {
            endpoint,
            traces_endpoint,
            headers,
            timeout_ms,
        } = &mut self.exporter
        {
            if let Some(value) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
                *endpoint = value;
            }
            if let Some(value) = get("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT") {
                *traces_endpoint = Some(value);
            }
            if let Some(value) = get("OTEL_EXPORTER_OTLP_HEADERS") {
                headers.extend(parse_key_value_list(&value));
            }
            if let Some(value) = get("OTEL_EXPORTER_OTLP_TIMEOUT") {
                match value.trim().parse::<u64>() {
                    Ok(ms) => *timeout_ms = ms,
                    Err(_) => warn!("Ignoring OTEL_EXPORTER_OTLP_TIMEOUT={:?}: not a number", value),
                }
            }
        }

        let ratio_arg = get("OTEL_TRACES_SAMPLER_ARG").and_then(|v| match v.trim().parse::<f64>() {
            Ok(r) => Some(r),
            Err(_) => {
                warn!("Ignoring OTEL_TRACES_SAMPLER_ARG={:?}: not a number", v);
                None
            }
        });
        if let Some(sampler) = get("OTEL_TRACES_SAMPLER") {
            let ratio = ratio_arg.unwrap_or(1.0);
            match sampler.trim().to_lowercase().as_str() {
                "always_on" => self.sampler = SamplerConfig::AlwaysOn,
                "always_off" => self.sampler = SamplerConfig::AlwaysOff,
                "traceidratio" => self.sampler = SamplerConfig::TraceIdRatio { ratio },
                "parentbased_always_on" => self.sampler = SamplerConfig::ParentBased { ratio: 1.0 },
                "parentbased_always_off" => {
                    self.sampler = SamplerConfig::ParentBased { ratio: 0.0 }
                }
                "parentbased_traceidratio" => self.sampler = SamplerConfig::ParentBased { ratio },
                other => warn!("Unsupported OTEL_TRACES_SAMPLER {:?}, keeping configured sampler", other),
            }
        } else if let Some(ratio) = ratio_arg {
            match &mut self.sampler {
                SamplerConfig::TraceIdRatio { ratio: current }
                | SamplerConfig::ParentBased { ratio: current } => *current = ratio,
                _ => {}
            }
        }

        if get("OTEL_SDK_DISABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.exporter = ExporterConfig::None;
            self.console = None;
        }

        self
    }

    /// Check limits, ratios and patterns before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(EnrichmentError::InvalidConfig(
                "service_name must not be empty".into(),
            ));
        }

        self.limits.validate()?;

        match &self.sampler {
            SamplerConfig::TraceIdRatio { ratio } | SamplerConfig::ParentBased { ratio }
                if !(0.0..=1.0).contains(ratio) =>
            {
                return Err(EnrichmentError::InvalidConfig(format!(
                    "sampler ratio must be within 0.0..=1.0 (got {ratio})"
                )));
            }
            _ => {}
        }

        if let ExporterConfig::Otlp {
            endpoint,
            traces_endpoint,
            ..
        } = &self.exporter
        {
            let url = traces_url(endpoint, traces_endpoint.as_deref());
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(EnrichmentError::InvalidConfig(format!(
                    "OTLP endpoint must be an http(s) URL (got {url:?})"
                )));
            }
        }

        if self.queue.capacity == 0 || self.queue.max_batch == 0 {
            return Err(EnrichmentError::InvalidConfig(
                "queue.capacity and queue.max_batch must be at least 1".into(),
            ));
        }

        for pattern in &self.redaction.key_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                EnrichmentError::InvalidConfig(format!("bad redaction pattern {pattern:?}: {e}"))
            })?;
        }

        Ok(())
    }
}

/// Parse `k1=v1,k2=v2` as used by `OTEL_RESOURCE_ATTRIBUTES` and `OTEL_EXPORTER_OTLP_HEADERS`.
fn parse_key_value_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
