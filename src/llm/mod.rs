//! Language-model collaborator.
//!
//! The agent loop only needs one operation: given a preamble, a window of
//! conversation and the tool schemas, produce the next step (a final reply
//! or a batch of tool calls).

pub mod anthropic;

pub use anthropic::AnthropicProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Who authored a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant entry that requests tool calls, with optional text alongside.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.unwrap_or_default())
        }
    }

    /// Result of a tool call, paired with the assistant entry that requested it.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Tool result that reports a failure back to the model.
    pub fn tool_error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(tool_call_id, tool_name, content)
        }
    }
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// What the model wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    /// Final reply to the user.
    Reply(String),
    /// The model wants to call tools.
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        /// Optional text content alongside tool calls.
        content: Option<String>,
    },
}

/// Input for one model invocation.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub preamble: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Output of one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResponse {
    pub step: AgentStep,
    pub usage: TokenUsage,
}

/// A language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate the next step of the conversation.
    async fn next_step(&self, request: StepRequest<'_>) -> Result<StepResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_is_flagged() {
        let msg = ChatMessage::tool_error("call_1", "get_metrics", "Error: boom");
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.is_error);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("get_metrics"));
    }

    #[test]
    fn assistant_with_tool_calls_keeps_text() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_metrics".into(),
            arguments: serde_json::json!({"date": "yesterday"}),
        };
        let msg = ChatMessage::assistant_with_tool_calls(Some("Checking.".into()), vec![call]);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Checking.");
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn usage_total() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }
}
