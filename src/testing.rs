//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::{LlmError, PlatformError};
use crate::llm::{
    AgentStep, ChatMessage, LlmProvider, Role, StepRequest, StepResponse, TokenUsage, ToolCall,
};
use crate::platform::{AdPlatform, PlatformRequest};
use crate::tenant::IntegrationCredential;

pub(crate) fn credential(token: &str, ad_account_id: &str) -> IntegrationCredential {
    IntegrationCredential::new(
        SecretString::from(token.to_string()),
        ad_account_id.to_string(),
    )
}

/// A platform call as seen by [`RecordingPlatform`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub token: String,
    pub ad_account_id: String,
    pub request: PlatformRequest,
}

type Responder = Box<dyn Fn(&str, &PlatformRequest) -> Result<Value, PlatformError> + Send + Sync>;

/// Records every call and answers from a responder, after draining any
/// queued one-off failures.
pub(crate) struct RecordingPlatform {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<VecDeque<PlatformError>>,
    responder: Responder,
}

impl RecordingPlatform {
    /// Account insights answer `{"clicks": 42}`.
    pub fn new() -> Self {
        Self::with_responder(|_token, request| {
            Ok(match request {
                PlatformRequest::AccountInsights { .. } => json!({ "clicks": 42 }),
                PlatformRequest::CampaignInsights { campaign_id, .. } => {
                    json!({ "campaign_id": campaign_id, "clicks": 7 })
                }
                PlatformRequest::ListCampaigns { .. } => json!({ "count": 0, "campaigns": [] }),
                PlatformRequest::UpdateCampaignStatus { .. } => json!({ "success": true }),
            })
        })
    }

    pub fn with_responder(
        responder: impl Fn(&str, &PlatformRequest) -> Result<Value, PlatformError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
        }
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AdPlatform for RecordingPlatform {
    fn name(&self) -> &str {
        "recording"
    }

    async fn call(
        &self,
        credential: &IntegrationCredential,
        request: &PlatformRequest,
    ) -> Result<Value, PlatformError> {
        let token = credential.access_token().expose_secret().to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            token: token.clone(),
            ad_account_id: credential.ad_account_id().to_string(),
            request: request.clone(),
        });
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        (self.responder)(&token, request)
    }
}

/// One scripted model response.
pub(crate) enum Scripted {
    Step(AgentStep),
    Fail(LlmError),
}

/// Deterministic model stub.
///
/// Plays back scripted steps in order. Once the script is exhausted it either
/// repeats a fixed tool call (for budget tests) or replies with the content
/// of the most recent tool result, so identical tool results always yield
/// identical replies.
pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<ToolCall>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            repeat: None,
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the last tool result, or "OK".
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    /// Request one `get_metrics(date=yesterday)` call, then echo.
    pub fn metrics_then_echo() -> Self {
        Self::new([tool_step("call_1", "get_metrics", json!({"date": "yesterday"}))])
    }

    /// Keep requesting the same tool forever.
    pub fn always_calling(name: &str, arguments: Value) -> Self {
        Self {
            repeat: Some(ToolCall {
                id: "loop".into(),
                name: name.into(),
                arguments,
            }),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_messages(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

pub(crate) fn tool_step(id: &str, name: &str, arguments: Value) -> Scripted {
    Scripted::Step(AgentStep::ToolCalls {
        tool_calls: vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }],
        content: None,
    })
}

pub(crate) fn reply_step(text: &str) -> Scripted {
    Scripted::Step(AgentStep::Reply(text.into()))
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn next_step(&self, request: StepRequest<'_>) -> Result<StepResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let step = match scripted {
            Some(Scripted::Step(step)) => step,
            Some(Scripted::Fail(error)) => return Err(error),
            None => match &self.repeat {
                Some(call) => AgentStep::ToolCalls {
                    tool_calls: vec![ToolCall {
                        id: format!("{}_{n}", call.id),
                        ..call.clone()
                    }],
                    content: None,
                },
                None => {
                    let last_tool = request
                        .messages
                        .iter()
                        .rev()
                        .take_while(|m| m.role != Role::User)
                        .find(|m| m.role == Role::Tool);
                    match last_tool {
                        Some(result) => AgentStep::Reply(format!("Result: {}", result.content)),
                        None => AgentStep::Reply("OK".into()),
                    }
                }
            },
        };

        Ok(StepResponse {
            step,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}
