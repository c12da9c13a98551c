//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Session and turn configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Sessions with no turn inside this window are evicted.
    pub session_idle_timeout: Duration,
    /// How often the background sweeper looks for idle sessions.
    pub sweep_interval: Duration,
    /// Hard cap on tool calls within one turn.
    pub max_tool_calls_per_turn: usize,
    /// Number of most recent memory entries submitted to the model.
    pub memory_window: usize,
    /// Upper bound on a single model invocation.
    pub agent_timeout: Duration,
    /// Retries for transient storage errors while loading credentials.
    pub vault_retry: RetryPolicy,
    /// Retries for transient platform errors inside a tool call.
    pub tool_retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            max_tool_calls_per_turn: 15,
            memory_window: 40,
            agent_timeout: Duration::from_secs(60),
            vault_retry: RetryPolicy::new(2, Duration::from_millis(200)),
            tool_retry: RetryPolicy::new(3, Duration::from_millis(500)),
        }
    }
}

impl AgentConfig {
    /// Read overrides from `ADGENIUS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            session_idle_timeout: Duration::from_secs(env_or(
                "ADGENIUS_SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(env_or(
                "ADGENIUS_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            max_tool_calls_per_turn: env_or(
                "ADGENIUS_MAX_TOOL_CALLS",
                defaults.max_tool_calls_per_turn,
            )?,
            memory_window: env_or("ADGENIUS_MEMORY_WINDOW", defaults.memory_window)?,
            agent_timeout: Duration::from_secs(env_or(
                "ADGENIUS_AGENT_TIMEOUT_SECS",
                defaults.agent_timeout.as_secs(),
            )?),
            vault_retry: defaults.vault_retry,
            tool_retry: RetryPolicy::new(
                env_or("ADGENIUS_TOOL_MAX_ATTEMPTS", defaults.tool_retry.max_attempts)?,
                defaults.tool_retry.initial_backoff,
            ),
        })
    }
}

/// Language-model settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("ADGENIUS_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            temperature: env_or("ADGENIUS_TEMPERATURE", 0.2)?,
            max_tokens: env_or("ADGENIUS_MAX_TOKENS", 1024)?,
        })
    }
}

/// HTTP server and collaborator endpoints.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub graph_api_base: String,
    /// Allowed CORS origins. Empty means same-origin only.
    pub frontend_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let frontend_origins = std::env::var("FRONTEND_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:8080,http://127.0.0.1:8080".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port: env_or("ADGENIUS_PORT", 8080)?,
            db_path: std::env::var("ADGENIUS_DB_PATH")
                .unwrap_or_else(|_| "./data/adgenius.db".to_string()),
            graph_api_base: std::env::var("META_GRAPH_API_BASE")
                .unwrap_or_else(|_| crate::platform::meta::DEFAULT_GRAPH_API_BASE.to_string()),
            frontend_origins,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tool_calls_per_turn, 15);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.vault_retry.max_attempts, 2);
        assert_eq!(config.tool_retry.max_attempts, 3);
        assert!(config.memory_window > 0);
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u64>("ADGENIUS_SESSION_IDLE_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("ADGENIUS_SESSION_IDLE_SECS"));
        assert_eq!(parse_value::<u64>("K", " 42 ").unwrap(), 42);
    }
}
