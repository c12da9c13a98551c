//! Error types for AdGenius.

use std::time::Duration;

use uuid::Uuid;

use crate::tenant::TenantId;

/// Top-level error returned to the caller of a chat turn or session operation.
///
/// Every variant names the tenant (and turn, where one was running) so the
/// failure can be traced without carrying any credential material.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tenant {tenant} has no stored ad-platform integration")]
    CredentialMissing { tenant: TenantId },

    #[error("Stored integration for tenant {tenant} is invalid: {reason}")]
    CredentialInvalid { tenant: TenantId, reason: String },

    #[error("Business profile for tenant {tenant} is incomplete (missing: {})", .missing.join(", "))]
    ProfileIncomplete {
        tenant: TenantId,
        missing: Vec<&'static str>,
    },

    #[error("A turn is already in progress for tenant {tenant}")]
    SessionBusy { tenant: TenantId },

    #[error("Agent did not respond within {timeout:?} (tenant {tenant}, turn {turn_id})")]
    AgentTimeout {
        tenant: TenantId,
        turn_id: Uuid,
        timeout: Duration,
    },

    #[error("Ad-platform integration expired for tenant {tenant} (turn {turn_id}, tool {tool})")]
    IntegrationExpired {
        tenant: TenantId,
        turn_id: Uuid,
        tool: String,
    },

    #[error("Turn {turn_id} for tenant {tenant} exceeded {limit} tool calls")]
    ToolBudgetExhausted {
        tenant: TenantId,
        turn_id: Uuid,
        limit: usize,
    },

    #[error("Turn {turn_id} for tenant {tenant} was cancelled")]
    TurnCancelled { tenant: TenantId, turn_id: Uuid },

    #[error("LLM error (tenant {tenant}, turn {turn_id}): {source}")]
    Llm {
        tenant: TenantId,
        turn_id: Uuid,
        #[source]
        source: LlmError,
    },

    #[error("Storage error for tenant {tenant}: {source}")]
    Storage {
        tenant: TenantId,
        #[source]
        source: DatabaseError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Tenant the error belongs to, if any.
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            Self::CredentialMissing { tenant }
            | Self::CredentialInvalid { tenant, .. }
            | Self::ProfileIncomplete { tenant, .. }
            | Self::SessionBusy { tenant }
            | Self::AgentTimeout { tenant, .. }
            | Self::IntegrationExpired { tenant, .. }
            | Self::ToolBudgetExhausted { tenant, .. }
            | Self::TurnCancelled { tenant, .. }
            | Self::Llm { tenant, .. }
            | Self::Storage { tenant, .. } => Some(tenant),
            Self::Config(_) => None,
        }
    }

    /// Whether the tenant has to fix their integration or profile before
    /// any turn can succeed.
    pub fn needs_tenant_action(&self) -> bool {
        matches!(
            self,
            Self::CredentialMissing { .. }
                | Self::CredentialInvalid { .. }
                | Self::ProfileIncomplete { .. }
                | Self::IntegrationExpired { .. }
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Database temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Transient failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Advertising-platform collaborator errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    /// Token expired or revoked. Never retried.
    #[error("Platform rejected the access token: {reason}")]
    Unauthorized { reason: String },

    /// Timeouts, 5xx and throttling.
    #[error("Transient platform failure (status {status:?}): {reason}")]
    Transient { status: Option<u16>, reason: String },

    /// The platform understood the request and refused it.
    #[error("Platform rejected the request (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Invalid platform response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors produced by a bound tool.
///
/// All variants except [`ToolError::CredentialExpired`] are fed back to the
/// agent as an error tool-result so it can try another approach.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments for tool {name}: {reason}")]
    InvalidArgs { name: String, reason: String },

    #[error("Tool {name} is not available in this session")]
    UnknownTool { name: String },

    #[error("Tool {name} failed: credentials expired or revoked")]
    CredentialExpired { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

impl ToolError {
    /// Terminal errors abort the whole turn instead of being fed back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CredentialExpired { .. })
    }
}
