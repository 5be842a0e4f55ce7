//! Lifecycle event payloads and the orchestrator data they borrow.
//!
//! The data types follow the common agent wire format so that typed values
//! and loosely-typed mappings serialize to the same JSON:
//!
//! ```json
//! {"role": "assistant", "content": [
//!   {"text": "Let me calculate that."},
//!   {"toolUse": {"toolUseId": "t1", "name": "calculator", "input": {"expression": "2+2"}}}
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::accessor::Source;
use super::InvocationId;
use crate::telemetry::TraceContext;

// ============================================================================
// Orchestrator Data
// ============================================================================

/// A capability the orchestrator exposes to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(
        default,
        rename = "inputSchema",
        alias = "input_schema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
}

/// A history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text(text.into())])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::Text(text.into())])
    }

    /// All text blocks, newline-joined
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUse> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        })
    }
}

/// A model's request to invoke a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolUse {
    pub fn new(tool_use_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Outcome reported by a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

impl ToolResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolResultStatus::Success => "success",
            ToolResultStatus::Error => "error",
        }
    }
}

/// One block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContent {
    Text(String),
    Json(Value),
}

/// What a capability returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Success,
            content: vec![ToolResultContent::Text(text.into())],
        }
    }

    pub fn error(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Error,
            content: vec![ToolResultContent::Text(text.into())],
        }
    }

    /// First text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ToolResultContent::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// The orchestrator state visible before a model invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(default)]
    pub tools: Vec<CapabilityDescriptor>,

    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Free-form agent state; keys starting with `_` are private
    #[serde(default)]
    pub state: Map<String, Value>,
}

// ============================================================================
// Event Payloads
// ============================================================================

/// Fired before the orchestrator asks the model what to do.
#[derive(Debug, Clone, Copy)]
pub struct BeforeInvocationEvent<'a> {
    pub invocation: InvocationId,

    /// The orchestrator's own trace context, when it runs one
    pub trace_context: Option<TraceContext>,

    pub agent: Source<'a, AgentSnapshot>,
}

/// Fired after the model has produced its output for a turn.
#[derive(Debug, Clone, Copy)]
pub struct AfterModelCallEvent<'a> {
    pub invocation: InvocationId,
    pub message: Source<'a, Message>,
    pub stop_reason: Option<&'a str>,
}

/// Fired once per tool the model selected, before it runs.
#[derive(Debug, Clone, Copy)]
pub struct BeforeToolCallEvent<'a> {
    pub invocation: InvocationId,
    pub tool_use: Source<'a, ToolUse>,
}

/// Fired after a tool has run, successfully or not.
#[derive(Debug, Clone, Copy)]
pub struct AfterToolCallEvent<'a> {
    pub invocation: InvocationId,
    pub tool_use: Option<Source<'a, ToolUse>>,
    pub result: Source<'a, ToolResult>,

    /// Exception text when the tool raised instead of returning
    pub exception: Option<&'a str>,
}

/// Fired when the invocation is over.
#[derive(Debug, Clone, Copy)]
pub struct AfterInvocationEvent {
    pub invocation: InvocationId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_content_block_wire_shape() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::Text("Let me calculate that.".into()),
                ContentBlock::ToolUse(ToolUse::new(
                    "t1",
                    "calculator",
                    json!({"expression": "2+2"}),
                )),
            ],
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": [
                    {"text": "Let me calculate that."},
                    {"toolUse": {"toolUseId": "t1", "name": "calculator", "input": {"expression": "2+2"}}}
                ]
            })
        );

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let result = ToolResult::success("t1", "34.5");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"toolUseId": "t1", "status": "success", "content": [{"text": "34.5"}]})
        );
        assert_eq!(result.first_text(), Some("34.5"));
    }

    #[test]
    fn test_capability_accepts_both_schema_spellings() {
        let camel: CapabilityDescriptor =
            serde_json::from_value(json!({"name": "calc", "inputSchema": {"type": "object"}}))
                .unwrap();
        let snake: CapabilityDescriptor =
            serde_json::from_value(json!({"name": "calc", "input_schema": {"type": "object"}}))
                .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.description, "");
    }

    #[test]
    fn test_message_helpers() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::Text("a".into()),
                ContentBlock::ToolUse(ToolUse::new("t1", "calc", json!({}))),
                ContentBlock::Text("b".into()),
            ],
        );
        assert_eq!(message.text(), "a\nb");
        assert_eq!(message.tool_uses().count(), 1);
        assert_eq!(Message::user("hi").role.to_string(), "user");
    }
}
