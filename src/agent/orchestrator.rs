//! Turn orchestrator — drives one user message through the agent and its
//! bound tools.
//!
//! The tool loop is bounded by a per-turn call cap. Memory only ever gains
//! complete steps: the user message up front, then each tool call together
//! with its result, then the final reply. A turn that fails part-way keeps
//! whatever completed before the failure.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::session::AgentSession;
use crate::config::AgentConfig;
use crate::error::{Error, LlmError};
use crate::llm::{AgentStep, ChatMessage, StepResponse, TokenUsage, ToolCall};

/// One tool call made during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub call_id: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Cost and timing of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnMetrics {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub agent_calls: u32,
    pub tool_calls: u32,
    pub latency_ms: u64,
}

/// Outcome of a successful turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    pub turn_id: Uuid,
    pub reply: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub metrics: TurnMetrics,
}

/// Runs turns against a session.
#[derive(Debug, Clone)]
pub struct TurnOrchestrator {
    max_tool_calls: usize,
    memory_window: usize,
    agent_timeout: Duration,
}

/// Per-turn bookkeeping.
struct TurnState {
    turn_id: Uuid,
    started: Instant,
    usage: TokenUsage,
    agent_calls: u32,
    invocations: Vec<ToolInvocation>,
}

impl TurnState {
    fn metrics(&self) -> TurnMetrics {
        TurnMetrics {
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            agent_calls: self.agent_calls,
            tool_calls: self.invocations.len() as u32,
            latency_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

impl TurnOrchestrator {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_tool_calls: config.max_tool_calls_per_turn,
            memory_window: config.memory_window.max(1),
            agent_timeout: config.agent_timeout,
        }
    }

    /// Run one exchange: append `message`, loop agent steps and tool calls
    /// until the agent replies, and return the reply with its tool trace.
    pub async fn run_turn(
        &self,
        session: &mut AgentSession,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, Error> {
        let tenant = session.tenant().clone();
        let mut state = TurnState {
            turn_id: Uuid::new_v4(),
            started: Instant::now(),
            usage: TokenUsage::default(),
            agent_calls: 0,
            invocations: Vec::new(),
        };
        let turn_id = state.turn_id;

        tracing::info!(tenant = %tenant, turn_id = %turn_id, "Turn started");

        session.memory_mut().push(ChatMessage::user(message));
        session.touch(Utc::now());

        loop {
            let response = self.call_agent(session, &mut state, cancel).await?;

            let (tool_calls, mut content) = match response.step {
                AgentStep::Reply(text) => {
                    if text.trim().is_empty() {
                        tracing::warn!(tenant = %tenant, turn_id = %turn_id, "Agent returned an empty reply");
                        return Err(Error::Llm {
                            tenant,
                            turn_id,
                            source: LlmError::InvalidResponse {
                                provider: session.agent().model_name().to_string(),
                                reason: "empty reply".to_string(),
                            },
                        });
                    }
                    let reply = session.tools().scrub(&text);
                    session.memory_mut().push(ChatMessage::assistant(&reply));
                    session.record_turn(Utc::now());

                    let metrics = state.metrics();
                    tracing::info!(
                        tenant = %tenant,
                        turn_id = %turn_id,
                        agent_calls = metrics.agent_calls,
                        tool_calls = metrics.tool_calls,
                        latency_ms = metrics.latency_ms,
                        "Turn completed"
                    );
                    return Ok(TurnResult {
                        turn_id,
                        reply,
                        tool_invocations: state.invocations,
                        metrics,
                    });
                }
                AgentStep::ToolCalls {
                    tool_calls,
                    content,
                } => (tool_calls, content),
            };

            if tool_calls.is_empty() {
                return Err(Error::Llm {
                    tenant,
                    turn_id,
                    source: LlmError::InvalidResponse {
                        provider: session.agent().model_name().to_string(),
                        reason: "tool-call step without tool calls".to_string(),
                    },
                });
            }

            for call in tool_calls {
                if cancel.is_cancelled() {
                    tracing::info!(tenant = %tenant, turn_id = %turn_id, "Turn cancelled");
                    return Err(Error::TurnCancelled { tenant, turn_id });
                }
                if state.invocations.len() >= self.max_tool_calls {
                    tracing::warn!(
                        tenant = %tenant,
                        turn_id = %turn_id,
                        limit = self.max_tool_calls,
                        "Tool-call budget exhausted"
                    );
                    return Err(Error::ToolBudgetExhausted {
                        tenant,
                        turn_id,
                        limit: self.max_tool_calls,
                    });
                }

                self.run_tool(session, &mut state, call, content.take())
                    .await?;
            }
        }
    }

    /// One agent invocation under the timeout, racing cancellation.
    async fn call_agent(
        &self,
        session: &AgentSession,
        state: &mut TurnState,
        cancel: &CancellationToken,
    ) -> Result<StepResponse, Error> {
        let tenant = session.tenant();
        let window = session.memory().window(self.memory_window);
        state.agent_calls += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::TurnCancelled {
                    tenant: tenant.clone(),
                    turn_id: state.turn_id,
                });
            }
            outcome = tokio::time::timeout(self.agent_timeout, session.agent().next_step(window)) => outcome,
        };

        match outcome {
            Err(_) => {
                tracing::warn!(
                    tenant = %tenant,
                    turn_id = %state.turn_id,
                    timeout_ms = self.agent_timeout.as_millis() as u64,
                    "Agent call timed out"
                );
                Err(Error::AgentTimeout {
                    tenant: tenant.clone(),
                    turn_id: state.turn_id,
                    timeout: self.agent_timeout,
                })
            }
            Ok(Err(source)) => {
                tracing::warn!(
                    tenant = %tenant,
                    turn_id = %state.turn_id,
                    error = %source,
                    "Agent call failed"
                );
                Err(Error::Llm {
                    tenant: tenant.clone(),
                    turn_id: state.turn_id,
                    source,
                })
            }
            Ok(Ok(response)) => {
                state.usage.input_tokens += response.usage.input_tokens;
                state.usage.output_tokens += response.usage.output_tokens;
                Ok(response)
            }
        }
    }

    /// Execute one tool call, record it, and append the call/result pair.
    async fn run_tool(
        &self,
        session: &mut AgentSession,
        state: &mut TurnState,
        call: ToolCall,
        content: Option<String>,
    ) -> Result<(), Error> {
        let tenant = session.tenant().clone();
        let at = Utc::now();
        let started = Instant::now();

        let outcome = session.tools().execute(&call.name, &call.arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let arguments = session.tools().scrub_json(&call.arguments);
        let (result_entry, invocation) = match outcome {
            Ok(value) => {
                tracing::debug!(
                    tenant = %tenant,
                    turn_id = %state.turn_id,
                    tool = %call.name,
                    elapsed_ms,
                    "Tool call succeeded"
                );
                let entry = ChatMessage::tool_result(&call.id, &call.name, value.to_string());
                let invocation = ToolInvocation {
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    arguments,
                    result: Some(value),
                    error: None,
                    at,
                    elapsed_ms,
                };
                (entry, invocation)
            }
            Err(e) if e.is_terminal() => {
                tracing::warn!(
                    tenant = %tenant,
                    turn_id = %state.turn_id,
                    tool = %call.name,
                    "Integration credential expired; aborting turn"
                );
                session.mark_stale();
                return Err(Error::IntegrationExpired {
                    tenant,
                    turn_id: state.turn_id,
                    tool: call.name,
                });
            }
            Err(e) => {
                let message = session.tools().scrub(&e.to_string());
                tracing::warn!(
                    tenant = %tenant,
                    turn_id = %state.turn_id,
                    tool = %call.name,
                    elapsed_ms,
                    error = %message,
                    "Tool call failed"
                );
                let entry =
                    ChatMessage::tool_error(&call.id, &call.name, format!("Error: {message}"));
                let invocation = ToolInvocation {
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    arguments,
                    result: None,
                    error: Some(message),
                    at,
                    elapsed_ms,
                };
                (entry, invocation)
            }
        };

        let memory = session.memory_mut();
        memory.push(ChatMessage::assistant_with_tool_calls(content, vec![call]));
        memory.push(result_entry);
        state.invocations.push(invocation);
        Ok(())
    }
}
