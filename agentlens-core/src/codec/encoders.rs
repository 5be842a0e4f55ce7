//! Built-in shape encoders for the common agent wire format.

use serde_json::Value;

use super::ShapeEncoder;
use crate::error::{EnrichmentError, Result};

const BLOCK_KEYS: [&str; 4] = ["text", "toolUse", "toolResult", "json"];

fn is_block(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => map.len() == 1 && BLOCK_KEYS.iter().any(|k| map.contains_key(*k)),
        None => false,
    }
}

fn unsupported(shape: &str, reason: impl Into<String>) -> EnrichmentError {
    EnrichmentError::UnsupportedShape {
        shape: shape.to_string(),
        reason: reason.into(),
    }
}

fn block_summary(block: &Value) -> Result<String> {
    if let Some(text) = block.get("text").and_then(Value::as_str) {
        return Ok(format!("[text]: {text}"));
    }
    if let Some(tool_use) = block.get("toolUse") {
        let name = tool_use
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| unsupported("content_block", "toolUse block without a name"))?;
        return Ok(format!("[toolUse]: {name}"));
    }
    if let Some(result) = block.get("toolResult") {
        let id = result
            .get("toolUseId")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Ok(format!("[toolResult]: {id} - {status}"));
    }
    if let Some(json) = block.get("json") {
        return Ok(format!("[json]: {json}"));
    }
    Err(unsupported("content_block", "unrecognized block"))
}

/// `[{"text": ..}, {"toolUse": ..}]` and single blocks
pub struct ContentBlocksEncoder;

impl ShapeEncoder for ContentBlocksEncoder {
    fn shape(&self) -> &str {
        "content_blocks"
    }

    fn matches(&self, value: &Value) -> bool {
        match value {
            Value::Array(items) => !items.is_empty() && items.iter().all(is_block),
            other => is_block(other),
        }
    }

    fn summarize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Array(items) => Ok(items
                .iter()
                .map(block_summary)
                .collect::<Result<Vec<_>>>()?
                .join(" | ")),
            other => block_summary(other),
        }
    }
}

/// `{"role": .., "content": ..}`
pub struct MessageEncoder;

impl ShapeEncoder for MessageEncoder {
    fn shape(&self) -> &str {
        "message"
    }

    fn matches(&self, value: &Value) -> bool {
        value.get("role").is_some_and(Value::is_string) && value.get("content").is_some()
    }

    fn summarize(&self, value: &Value) -> Result<String> {
        let role = value.get("role").and_then(Value::as_str).unwrap_or("unknown");
        let content = match value.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(blocks) if ContentBlocksEncoder.matches(blocks) => {
                ContentBlocksEncoder.summarize(blocks)?
            }
            Some(Value::Array(blocks)) if blocks.is_empty() => String::new(),
            _ => return Err(unsupported("message", "content is not text or blocks")),
        };
        Ok(format!("{role}: {content}"))
    }
}

/// `{"toolUseId": .., "status": .., "content": [..]}`
pub struct ToolResultEncoder;

impl ShapeEncoder for ToolResultEncoder {
    fn shape(&self) -> &str {
        "tool_result"
    }

    fn matches(&self, value: &Value) -> bool {
        value.get("toolUseId").is_some() && value.get("status").is_some()
    }

    fn summarize(&self, value: &Value) -> Result<String> {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| unsupported("tool_result", "status is not a string"))?;
        let first_text = value
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.iter().find_map(|b| b.get("text")))
            .and_then(Value::as_str);
        Ok(match first_text {
            Some(text) => format!("{status}: {text}"),
            None => status.to_string(),
        })
    }
}

/// `{"name": .., "description": .., "inputSchema": ..}`
pub struct CapabilityEncoder;

impl ShapeEncoder for CapabilityEncoder {
    fn shape(&self) -> &str {
        "capability"
    }

    fn matches(&self, value: &Value) -> bool {
        let spec = value.get("toolSpec").unwrap_or(value);
        spec.get("name").is_some_and(Value::is_string)
            && (spec.get("description").is_some() || spec.get("inputSchema").is_some())
    }

    fn summarize(&self, value: &Value) -> Result<String> {
        let spec = value.get("toolSpec").unwrap_or(value);
        let name = spec
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| unsupported("capability", "missing name"))?;
        Ok(match spec.get("description").and_then(Value::as_str) {
            Some(description) if !description.is_empty() => format!("{name}: {description}"),
            _ => name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_blocks() {
        let blocks = json!([
            {"text": "Let me check"},
            {"toolUse": {"toolUseId": "t1", "name": "weather", "input": {}}},
            {"toolResult": {"toolUseId": "t1", "status": "success", "content": []}}
        ]);
        assert!(ContentBlocksEncoder.matches(&blocks));
        assert_eq!(
            ContentBlocksEncoder.summarize(&blocks).unwrap(),
            "[text]: Let me check | [toolUse]: weather | [toolResult]: t1 - success"
        );
    }

    #[test]
    fn test_content_blocks_reject_foreign_arrays() {
        assert!(!ContentBlocksEncoder.matches(&json!([1, 2])));
        assert!(!ContentBlocksEncoder.matches(&json!([])));
        assert!(!ContentBlocksEncoder.matches(&json!([{"text": "a", "extra": 1}])));
    }

    #[test]
    fn test_tool_use_without_name_is_unsupported() {
        let err = ContentBlocksEncoder
            .summarize(&json!([{"toolUse": {"toolUseId": "t1"}}]))
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::UnsupportedShape { .. }));
    }

    #[test]
    fn test_message() {
        let message = json!({"role": "user", "content": [{"text": "What's 15% of 230?"}]});
        assert!(MessageEncoder.matches(&message));
        assert_eq!(
            MessageEncoder.summarize(&message).unwrap(),
            "user: [text]: What's 15% of 230?"
        );
        assert_eq!(
            MessageEncoder
                .summarize(&json!({"role": "assistant", "content": "done"}))
                .unwrap(),
            "assistant: done"
        );
    }

    #[test]
    fn test_tool_result() {
        let result = json!({"toolUseId": "t1", "status": "error", "content": [{"text": "division by zero"}]});
        assert!(ToolResultEncoder.matches(&result));
        assert_eq!(
            ToolResultEncoder.summarize(&result).unwrap(),
            "error: division by zero"
        );
    }

    #[test]
    fn test_capability() {
        let spec = json!({"toolSpec": {"name": "calculator", "description": "Evaluate math", "inputSchema": {}}});
        assert!(CapabilityEncoder.matches(&spec));
        assert_eq!(
            CapabilityEncoder.summarize(&spec).unwrap(),
            "calculator: Evaluate math"
        );
    }
}
