//! Field access over typed payloads and loosely-typed mappings.
//!
//! Orchestrators hand us either their own structs or a JSON-ish mapping
//! whose field names vary by version. [`FieldReader`] reads a typed value
//! directly and falls back to alias lookup for mappings, producing the same
//! views either way.

use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;

use super::events::{AgentSnapshot, Message, ToolResult, ToolUse};
use crate::config::FieldAliases;

/// A payload borrowed from the orchestrator.
pub enum Source<'a, T> {
    Typed(&'a T),
    Mapping(&'a Value),
}

impl<T> Clone for Source<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Source<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for Source<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Typed(value) => f.debug_tuple("Typed").field(value).finish(),
            Source::Mapping(value) => f.debug_tuple("Mapping").field(value).finish(),
        }
    }
}

impl<'a, T: Serialize> Source<'a, T> {
    /// The payload as JSON, borrowed when it already is JSON.
    pub fn to_value(&self) -> Result<Cow<'a, Value>, serde_json::Error> {
        match *self {
            Source::Typed(value) => serde_json::to_value(value).map(Cow::Owned),
            Source::Mapping(value) => Ok(Cow::Borrowed(value)),
        }
    }
}

/// Capability as seen by handlers
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityView<'a> {
    pub name: Cow<'a, str>,
    pub description: Option<Cow<'a, str>>,
    pub input_schema: Option<Cow<'a, Value>>,
}

/// History entry as seen by handlers
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView<'a> {
    pub role: Option<Cow<'a, str>>,
    /// Content blocks in wire form (or a bare string)
    pub content: Cow<'a, Value>,
    pub stop_reason: Option<Cow<'a, str>>,
}

impl MessageView<'_> {
    /// Whether any content block requests a tool.
    pub fn has_tool_use(&self) -> bool {
        match self.content.as_ref() {
            Value::Array(blocks) => blocks.iter().any(|b| b.get("toolUse").is_some()),
            Value::Object(map) => map.contains_key("toolUse"),
            _ => false,
        }
    }

    /// Text blocks, newline-joined.
    pub fn text(&self) -> String {
        collect_text(self.content.as_ref())
    }
}

/// Tool request as seen by handlers
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseView<'a> {
    pub tool_use_id: Option<Cow<'a, str>>,
    pub name: Option<Cow<'a, str>>,
    pub input: Option<Cow<'a, Value>>,
}

/// Tool outcome as seen by handlers
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultView<'a> {
    pub tool_use_id: Option<Cow<'a, str>>,
    pub status: Option<Cow<'a, str>>,
    /// Content blocks in wire form; `Null` when absent
    pub content: Cow<'a, Value>,
    pub error: Option<Cow<'a, str>>,
}

impl ToolResultView<'_> {
    /// Number of content blocks (a bare scalar counts as one).
    pub fn content_blocks(&self) -> usize {
        match self.content.as_ref() {
            Value::Array(blocks) => blocks.len(),
            Value::Null => 0,
            _ => 1,
        }
    }

    /// First text block.
    pub fn first_text(&self) -> Option<String> {
        match self.content.as_ref() {
            Value::String(s) => Some(s.clone()),
            Value::Array(blocks) => blocks
                .iter()
                .find_map(|b| b.get("text").and_then(Value::as_str))
                .map(str::to_string),
            Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }
}

/// Reads logical fields from either payload form.
#[derive(Debug, Clone, Default)]
pub struct FieldReader {
    aliases: FieldAliases,
}

impl FieldReader {
    pub fn new(aliases: FieldAliases) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &FieldAliases {
        &self.aliases
    }

    /// First alias present in `value`.
    pub fn lookup<'v>(&self, value: &'v Value, names: &[String]) -> Option<&'v Value> {
        let map = value.as_object()?;
        names
            .iter()
            .find_map(|name| map.get(name.as_str()))
            .filter(|v| !v.is_null())
    }

    fn lookup_text<'v>(&self, value: &'v Value, names: &[String]) -> Option<Cow<'v, str>> {
        self.lookup(value, names).and_then(scalar_text)
    }

    pub fn tools<'a>(&self, agent: Source<'a, AgentSnapshot>) -> Vec<CapabilityView<'a>> {
        match agent {
            Source::Typed(snapshot) => snapshot
                .tools
                .iter()
                .map(|tool| CapabilityView {
                    name: Cow::Borrowed(tool.name.as_str()),
                    description: non_empty(Some(Cow::Borrowed(tool.description.as_str()))),
                    input_schema: tool.input_schema.as_ref().map(Cow::Borrowed),
                })
                .collect(),
            Source::Mapping(value) => {
                if let Some(tools) = self.lookup(value, &self.aliases.tools) {
                    return self.capabilities_from(tools);
                }
                match self.lookup(value, &self.aliases.tool_names) {
                    Some(Value::Array(names)) => names
                        .iter()
                        .filter_map(scalar_text)
                        .map(|name| CapabilityView {
                            name,
                            description: None,
                            input_schema: None,
                        })
                        .collect(),
                    _ => Vec::new(),
                }
            }
        }
    }

    fn capabilities_from<'a>(&self, tools: &'a Value) -> Vec<CapabilityView<'a>> {
        match tools {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| self.capability(item, None))
                .collect(),
            // Registry form: name -> spec
            Value::Object(map) => map
                .iter()
                .filter_map(|(name, spec)| self.capability(spec, Some(name.as_str())))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn capability<'a>(&self, item: &'a Value, key: Option<&'a str>) -> Option<CapabilityView<'a>> {
        if let Value::String(name) = item {
            return Some(CapabilityView {
                name: Cow::Borrowed(name.as_str()),
                description: None,
                input_schema: None,
            });
        }
        // {"toolSpec": {...}} wrapper
        let spec = item.get("toolSpec").unwrap_or(item);
        let name = self
            .lookup_text(spec, &self.aliases.name)
            .or_else(|| key.map(Cow::Borrowed))?;
        Some(CapabilityView {
            name,
            description: non_empty(self.lookup_text(spec, &self.aliases.description)),
            input_schema: self
                .lookup(spec, &self.aliases.input_schema)
                .map(Cow::Borrowed),
        })
    }

    pub fn messages<'a>(&self, agent: Source<'a, AgentSnapshot>) -> Vec<MessageView<'a>> {
        match agent {
            Source::Typed(snapshot) => snapshot
                .messages
                .iter()
                .map(|m| self.message(Source::Typed(m)))
                .collect(),
            Source::Mapping(value) => match self.lookup(value, &self.aliases.messages) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|m| self.message(Source::Mapping(m)))
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    pub fn message<'a>(&self, message: Source<'a, Message>) -> MessageView<'a> {
        match message {
            Source::Typed(m) => MessageView {
                role: Some(Cow::Borrowed(m.role.as_str())),
                content: Cow::Owned(
                    serde_json::to_value(&m.content).unwrap_or(Value::Array(Vec::new())),
                ),
                stop_reason: None,
            },
            Source::Mapping(value) => MessageView {
                role: self.lookup_text(value, &self.aliases.role),
                content: self
                    .lookup(value, &self.aliases.content)
                    .map(Cow::Borrowed)
                    .unwrap_or(Cow::Owned(Value::Null)),
                stop_reason: self.lookup_text(value, &self.aliases.stop_reason),
            },
        }
    }

    pub fn system_prompt<'a>(&self, agent: Source<'a, AgentSnapshot>) -> Option<Cow<'a, str>> {
        match agent {
            Source::Typed(snapshot) => snapshot.system_prompt.as_deref().map(Cow::Borrowed),
            Source::Mapping(value) => match self.lookup(value, &self.aliases.system_prompt)? {
                Value::String(s) => Some(Cow::Borrowed(s.as_str())),
                // Prompt given as content blocks
                other @ Value::Array(_) => {
                    let text = collect_text(other);
                    (!text.is_empty()).then_some(Cow::Owned(text))
                }
                _ => None,
            },
        }
    }

    pub fn state<'a>(&self, agent: Source<'a, AgentSnapshot>) -> Option<&'a Map<String, Value>> {
        match agent {
            Source::Typed(snapshot) => Some(&snapshot.state),
            Source::Mapping(value) => self.lookup(value, &self.aliases.state)?.as_object(),
        }
    }

    pub fn tool_use<'a>(&self, tool_use: Source<'a, ToolUse>) -> ToolUseView<'a> {
        match tool_use {
            Source::Typed(t) => ToolUseView {
                tool_use_id: Some(Cow::Borrowed(t.tool_use_id.as_str())),
                name: Some(Cow::Borrowed(t.name.as_str())),
                input: Some(Cow::Borrowed(&t.input)),
            },
            Source::Mapping(value) => {
                let value = value.get("toolUse").unwrap_or(value);
                ToolUseView {
                    tool_use_id: self.lookup_text(value, &self.aliases.tool_use_id),
                    name: self.lookup_text(value, &self.aliases.name),
                    input: self
                        .lookup(value, &self.aliases.tool_input)
                        .map(Cow::Borrowed),
                }
            }
        }
    }

    pub fn tool_result<'a>(&self, result: Source<'a, ToolResult>) -> ToolResultView<'a> {
        match result {
            Source::Typed(r) => ToolResultView {
                tool_use_id: Some(Cow::Borrowed(r.tool_use_id.as_str())),
                status: Some(Cow::Borrowed(r.status.as_str())),
                content: Cow::Owned(
                    serde_json::to_value(&r.content).unwrap_or(Value::Array(Vec::new())),
                ),
                error: None,
            },
            Source::Mapping(value) => {
                let value = value.get("toolResult").unwrap_or(value);
                ToolResultView {
                    tool_use_id: self.lookup_text(value, &self.aliases.tool_use_id),
                    status: self.lookup_text(value, &self.aliases.status),
                    content: self
                        .lookup(value, &self.aliases.result)
                        .map(Cow::Borrowed)
                        .unwrap_or(Cow::Owned(Value::Null)),
                    error: self.lookup(value, &self.aliases.error).and_then(|e| match e {
                        Value::Object(map) => map
                            .get("message")
                            .and_then(scalar_text)
                            .or_else(|| Some(Cow::Owned(e.to_string()))),
                        other => scalar_text(other),
                    }),
                }
            }
        }
    }
}

fn non_empty(text: Option<Cow<'_, str>>) -> Option<Cow<'_, str>> {
    text.filter(|t| !t.trim().is_empty())
}

/// Strings as-is; numbers and bools rendered.
fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn collect_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::events::{CapabilityDescriptor, ContentBlock, Role};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reader() -> FieldReader {
        FieldReader::default()
    }

    #[test]
    fn test_typed_and_mapping_tools_agree() {
        let snapshot = AgentSnapshot {
            tools: vec![CapabilityDescriptor::new("calculator", "Evaluate math")],
            ..Default::default()
        };
        let mapping = json!({
            "tool_specs": [{"toolSpec": {"name": "calculator", "description": "Evaluate math"}}]
        });

        let typed = reader().tools(Source::Typed(&snapshot));
        let loose = reader().tools(Source::Mapping(&mapping));
        assert_eq!(typed, loose);
    }

    #[test]
    fn test_empty_description_is_absent() {
        let snapshot = AgentSnapshot {
            tools: vec![CapabilityDescriptor::new("calculator", "")],
            ..Default::default()
        };
        let bare = json!({"tools": [{"name": "calculator"}]});
        let blank = json!({"tools": [{"name": "calculator", "description": "  "}]});

        let typed = reader().tools(Source::Typed(&snapshot));
        assert_eq!(typed[0].description, None);
        assert_eq!(typed, reader().tools(Source::Mapping(&bare)));
        assert_eq!(typed, reader().tools(Source::Mapping(&blank)));
    }

    #[test]
    fn test_tool_names_fallback() {
        let mapping = json!({"tool_names": ["calculator", "weather"]});
        let tools = reader().tools(Source::Mapping(&mapping));
        let names: Vec<_> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["calculator", "weather"]);
    }

    #[test]
    fn test_registry_map_form() {
        let mapping = json!({"tools": {"calculator": {"description": "math"}}});
        let tools = reader().tools(Source::Mapping(&mapping));
        assert_eq!(tools[0].name, "calculator");
        assert_eq!(tools[0].description.as_deref(), Some("math"));
    }

    #[test]
    fn test_tool_use_aliases() {
        let snake = json!({"tool_use_id": "t1", "tool_name": "calc", "arguments": {"x": 1}});
        let view = reader().tool_use(Source::Mapping(&snake));
        assert_eq!(view.tool_use_id.as_deref(), Some("t1"));
        assert_eq!(view.name.as_deref(), Some("calc"));
        assert_eq!(view.input.as_deref(), Some(&json!({"x": 1})));

        let typed = ToolUse::new("t1", "calc", json!({"x": 1}));
        let camel = json!({"toolUseId": "t1", "name": "calc", "input": {"x": 1}});
        assert_eq!(
            reader().tool_use(Source::Typed(&typed)),
            reader().tool_use(Source::Mapping(&camel))
        );
    }

    #[test]
    fn test_tool_result_error_field() {
        let mapping = json!({"toolUseId": "t1", "status": "error", "error": {"message": "boom"}});
        let view = reader().tool_result(Source::Mapping(&mapping));
        assert_eq!(view.error.as_deref(), Some("boom"));
        assert_eq!(view.content_blocks(), 0);
    }

    #[test]
    fn test_message_views() {
        let typed = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::Text("thinking".into()),
                ContentBlock::ToolUse(ToolUse::new("t1", "calc", json!({}))),
            ],
        );
        let view = reader().message(Source::Typed(&typed));
        assert!(view.has_tool_use());
        assert_eq!(view.text(), "thinking");

        let loose = json!({"role": "assistant", "content": "plain answer", "stop_reason": "end_turn"});
        let view = reader().message(Source::Mapping(&loose));
        assert!(!view.has_tool_use());
        assert_eq!(view.text(), "plain answer");
        assert_eq!(view.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_system_prompt_blocks() {
        let mapping = json!({"system": [{"text": "You are"}, {"text": "helpful"}]});
        let prompt = reader().system_prompt(Source::Mapping(&mapping));
        assert_eq!(prompt.as_deref(), Some("You are\nhelpful"));
    }

    #[test]
    fn test_missing_fields_are_none() {
        let empty = json!({});
        let view = reader().tool_use(Source::Mapping(&empty));
        assert!(view.name.is_none());
        assert!(reader().state(Source::Mapping(&empty)).is_none());
        assert!(reader().messages(Source::Mapping(&empty)).is_empty());
    }
}
