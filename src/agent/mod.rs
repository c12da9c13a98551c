//! Agent module — agent construction, per-tenant sessions, and the turn loop.

pub mod factory;
pub mod orchestrator;
pub mod service;
pub mod session;
pub mod session_manager;

pub use factory::{Agent, AgentFactory, Sampling};
pub use orchestrator::{ToolInvocation, TurnMetrics, TurnOrchestrator, TurnResult};
pub use service::ChatService;
pub use session::{AgentSession, ConversationMemory};
pub use session_manager::{SessionManager, TurnGuard};
