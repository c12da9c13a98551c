//! Per-tenant conversation state.

use chrono::{DateTime, Utc};

use crate::agent::factory::Agent;
use crate::llm::{ChatMessage, Role};
use crate::tenant::TenantId;
use crate::tools::ToolSet;

/// Append-only conversation log for one session.
#[derive(Debug, Default, Clone)]
pub struct ConversationMemory {
    entries: Vec<ChatMessage>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ChatMessage) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `max` entries, moved so the window opens on a user
    /// message.
    ///
    /// A tool result is never separated from the call that produced it. If
    /// the tail holds no user message at all (one long tool loop), the window
    /// reaches back to the latest user message instead, so the model always
    /// sees what it was asked.
    pub fn window(&self, max: usize) -> &[ChatMessage] {
        let start = self.entries.len().saturating_sub(max);
        let is_user = |m: &ChatMessage| m.role == Role::User;

        let aligned = self.entries[start..]
            .iter()
            .position(is_user)
            .map(|offset| start + offset)
            .or_else(|| self.entries[..start].iter().rposition(is_user))
            .unwrap_or(0);

        &self.entries[aligned..]
    }
}

/// An active session: agent, bound tools and memory for one tenant.
pub struct AgentSession {
    tenant: TenantId,
    agent: Agent,
    tools: ToolSet,
    memory: ConversationMemory,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    turn_count: u64,
    /// The platform rejected the bound credential; rebind before the next turn.
    stale: bool,
}

impl AgentSession {
    pub fn new(tenant: TenantId, agent: Agent, tools: ToolSet) -> Self {
        let now = Utc::now();
        Self {
            tenant,
            agent,
            tools,
            memory: ConversationMemory::new(),
            created_at: now,
            last_active_at: now,
            turn_count: 0,
            stale: false,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut ConversationMemory {
        &mut self.memory
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Swap in a freshly built agent and tool set. Memory is kept.
    pub(crate) fn rebind(&mut self, agent: Agent, tools: ToolSet) {
        self.agent = agent;
        self.tools = tools;
        self.stale = false;
    }

    pub(crate) fn record_turn(&mut self, now: DateTime<Utc>) {
        self.turn_count += 1;
        self.last_active_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    fn tool_pair(memory: &mut ConversationMemory, id: &str) {
        memory.push(ChatMessage::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: id.into(),
                name: "get_metrics".into(),
                arguments: serde_json::json!({}),
            }],
        ));
        memory.push(ChatMessage::tool_result(id, "get_metrics", "{}"));
    }

    #[test]
    fn window_keeps_everything_when_small() {
        let mut memory = ConversationMemory::new();
        memory.push(ChatMessage::user("hi"));
        memory.push(ChatMessage::assistant("hello"));
        assert_eq!(memory.window(40).len(), 2);
    }

    #[test]
    fn window_aligns_to_user_message() {
        let mut memory = ConversationMemory::new();
        memory.push(ChatMessage::user("first"));
        tool_pair(&mut memory, "a");
        memory.push(ChatMessage::assistant("done"));
        memory.push(ChatMessage::user("second"));
        memory.push(ChatMessage::assistant("ok"));

        // Last 4 entries start at a tool result; the window skips ahead.
        let window = memory.window(4);
        assert_eq!(window[0].content, "second");
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn window_reaches_back_during_long_tool_loop() {
        let mut memory = ConversationMemory::new();
        memory.push(ChatMessage::user("old"));
        memory.push(ChatMessage::assistant("old reply"));
        memory.push(ChatMessage::user("current"));
        for id in ["a", "b", "c"] {
            tool_pair(&mut memory, id);
        }

        let window = memory.window(3);
        assert_eq!(window[0].content, "current");
        assert_eq!(window.len(), 7);
    }

    #[test]
    fn window_of_empty_memory_is_empty() {
        assert!(ConversationMemory::new().window(10).is_empty());
    }
}
