//! Anthropic Messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::llm::{
    AgentStep, ChatMessage, LlmProvider, Role, StepRequest, StepResponse, TokenUsage, ToolCall,
    ToolDefinition,
};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Calls `POST /v1/messages` with native tool use.
pub struct AnthropicProvider {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn next_step(&self, request: StepRequest<'_>) -> Result<StepResponse, LlmError> {
        let body = build_body(&self.model, &request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }

        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        parse_response(&text)
    }
}

fn build_body(model: &str, request: &StepRequest<'_>) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "system": request.preamble,
        "messages": to_api_messages(request.messages),
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(to_api_tool).collect());
    }
    body
}

fn to_api_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Convert conversation entries to API messages. Tool results travel as
/// user-role `tool_result` blocks; consecutive same-role entries are merged.
fn to_api_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            Role::User => ("user", vec![json!({"type": "text", "text": msg.content})]),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                for call in &msg.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                    "is_error": msg.is_error,
                })],
            ),
        };

        // The API rejects messages with no content blocks.
        if blocks.is_empty() {
            continue;
        }

        match out.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => out.push((role, blocks)),
        }
    }

    out.into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_response(text: &str) -> Result<StepResponse, LlmError> {
    let response: ApiResponse =
        serde_json::from_str(text).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ApiBlock::Text { text } => content.push_str(&text),
            ApiBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ApiBlock::Other => {}
        }
    }

    let step = if tool_calls.is_empty() {
        AgentStep::Reply(content)
    } else {
        AgentStep::ToolCalls {
            tool_calls,
            content: (!content.is_empty()).then_some(content),
        }
    };

    Ok(StepResponse {
        step,
        usage: TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_follow_tool_use_as_user_blocks() {
        let call = ToolCall {
            id: "toolu_1".into(),
            name: "get_metrics".into(),
            arguments: json!({"date": "yesterday"}),
        };
        let messages = vec![
            ChatMessage::user("How many clicks yesterday?"),
            ChatMessage::assistant_with_tool_calls(None, vec![call]),
            ChatMessage::tool_result("toolu_1", "get_metrics", r#"{"clicks":42}"#),
        ];

        let api = to_api_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[1]["role"], "assistant");
        assert_eq!(api[1]["content"][0]["type"], "tool_use");
        assert_eq!(api[2]["role"], "user");
        assert_eq!(api[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn consecutive_tool_results_are_merged() {
        let messages = vec![
            ChatMessage::tool_result("a", "get_metrics", "1"),
            ChatMessage::tool_error("b", "list_campaigns", "Error: nope"),
        ];
        let api = to_api_messages(&messages);
        assert_eq!(api.len(), 1);
        assert_eq!(api[0]["content"].as_array().unwrap().len(), 2);
        assert_eq!(api[0]["content"][1]["is_error"], true);
    }

    #[test]
    fn empty_assistant_entries_are_dropped() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant(""),
            ChatMessage::user("next"),
        ];
        let api = to_api_messages(&messages);
        assert_eq!(api.len(), 1);
        assert_eq!(api[0]["role"], "user");
        assert_eq!(api[0]["content"].as_array().unwrap().len(), 2);
        assert!(
            api.iter()
                .all(|m| !m["content"].as_array().unwrap().is_empty())
        );
    }

    #[test]
    fn parse_text_reply() {
        let body = r#"{"content":[{"type":"text","text":"You had 42 clicks."}],
                       "usage":{"input_tokens":12,"output_tokens":7}}"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.step, AgentStep::Reply("You had 42 clicks.".into()));
        assert_eq!(response.usage.total(), 19);
    }

    #[test]
    fn parse_tool_use() {
        let body = r#"{"content":[
            {"type":"text","text":"Let me check."},
            {"type":"tool_use","id":"toolu_1","name":"get_metrics","input":{"date":"yesterday"}}
        ]}"#;
        match parse_response(body).unwrap().step {
            AgentStep::ToolCalls {
                tool_calls,
                content,
            } => {
                assert_eq!(tool_calls[0].name, "get_metrics");
                assert_eq!(content.as_deref(), Some("Let me check."));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn parse_garbage_is_invalid_response() {
        assert!(matches!(
            parse_response("<html>"),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn body_includes_tools_only_when_present() {
        let request = StepRequest {
            preamble: "You are helpful.",
            messages: &[],
            tools: &[],
            temperature: 0.2,
            max_tokens: 256,
        };
        let body = build_body("claude-test", &request);
        assert!(body.get("tools").is_none());
        assert_eq!(body["system"], "You are helpful.");
    }
}
