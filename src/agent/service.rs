//! Chat service, the entry point the transport layer calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::factory::AgentFactory;
use crate::agent::orchestrator::{TurnOrchestrator, TurnResult};
use crate::agent::session_manager::SessionManager;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::platform::AdPlatform;
use crate::store::TenantStore;
use crate::tenant::TenantId;
use crate::tools::ToolBinder;
use crate::vault::CredentialVault;

/// Wires the session manager and turn orchestrator together.
pub struct ChatService {
    sessions: Arc<SessionManager>,
    orchestrator: TurnOrchestrator,
    config: AgentConfig,
}

impl ChatService {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn TenantStore>,
        platform: Arc<dyn AdPlatform>,
        factory: AgentFactory,
    ) -> Self {
        let sessions = SessionManager::new(
            CredentialVault::new(store, config.vault_retry.clone()),
            ToolBinder::new(platform, config.tool_retry.clone()),
            factory,
            config.session_idle_timeout,
        );
        Self {
            sessions: Arc::new(sessions),
            orchestrator: TurnOrchestrator::new(&config),
            config,
        }
    }

    /// Run one turn for `tenant`. Fails fast with `SessionBusy` if the tenant
    /// already has a turn in progress.
    pub async fn chat(
        &self,
        tenant: &TenantId,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<TurnResult, Error> {
        let mut turn = self.sessions.begin_turn(tenant).await?;
        self.orchestrator.run_turn(&mut turn, message, &cancel).await
    }

    /// End the tenant's session (logout).
    pub async fn close(&self, tenant: &TenantId) -> bool {
        self.sessions.close(tenant).await
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start the background idle sweeper.
    pub fn spawn_idle_sweeper(&self) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            idle_timeout_secs = self.config.session_idle_timeout.as_secs(),
            "Starting idle session sweeper"
        );
        self.sessions.spawn_idle_sweeper(self.config.sweep_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::tenant::BusinessProfile;
    use crate::error::PlatformError;
    use crate::testing::{RecordingPlatform, ScriptedLlm, tool_step};
    use serde_json::json;
    use std::time::Duration;

    async fn service(llm: ScriptedLlm) -> (ChatService, Arc<RecordingPlatform>) {
        let store = Arc::new(InMemoryStore::new());
        for (tenant, token, account) in [("acme", "tok-acme", "act_1"), ("globex", "tok-globex", "act_2")] {
            store
                .put_tenant(
                    &TenantId::new(tenant),
                    token,
                    account,
                    BusinessProfile::new(tenant, "leads"),
                )
                .await;
        }
        let platform = Arc::new(RecordingPlatform::new());
        let service = ChatService::new(
            AgentConfig::default(),
            store,
            platform.clone(),
            AgentFactory::new(Arc::new(llm)),
        );
        (service, platform)
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_tenant_are_rejected() {
        let (service, _) =
            service(ScriptedLlm::echo().with_delay(Duration::from_millis(100))).await;
        let service = Arc::new(service);
        let acme = TenantId::new("acme");

        let first = {
            let service = Arc::clone(&service);
            let acme = acme.clone();
            tokio::spawn(async move { service.chat(&acme, "one", CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = service.chat(&acme, "two", CancellationToken::new()).await;

        assert!(matches!(second, Err(Error::SessionBusy { .. })));
        assert!(first.await.unwrap().is_ok());

        // Memory holds only the winning turn.
        let turn = service.sessions().begin_turn(&acme).await.unwrap();
        let contents: Vec<&str> = turn
            .memory()
            .entries()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "OK"]);
    }

    #[tokio::test]
    async fn different_tenants_run_concurrently() {
        let (service, platform) =
            service(ScriptedLlm::metrics_then_echo().with_delay(Duration::from_millis(30))).await;
        let service = Arc::new(service);

        let acme = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .chat(&TenantId::new("acme"), "clicks?", CancellationToken::new())
                    .await
            })
        };
        let globex = service
            .chat(&TenantId::new("globex"), "hello", CancellationToken::new())
            .await;

        assert!(globex.is_ok());
        assert!(acme.await.unwrap().is_ok());
        assert_eq!(service.sessions().len().await, 2);

        // The scripted step is consumed by whichever tenant asked first; every
        // platform call still carries its own tenant's token.
        for call in platform.calls() {
            let expected = if call.ad_account_id == "act_1" {
                "tok-acme"
            } else {
                "tok-globex"
            };
            assert_eq!(call.token, expected);
        }
    }

    #[tokio::test]
    async fn close_then_chat_starts_fresh() {
        let (service, _) = service(ScriptedLlm::echo()).await;
        let acme = TenantId::new("acme");

        service
            .chat(&acme, "hello", CancellationToken::new())
            .await
            .unwrap();
        assert!(service.close(&acme).await);
        assert!(!service.sessions().contains(&acme).await);

        service
            .chat(&acme, "again", CancellationToken::new())
            .await
            .unwrap();
        let turn = service.sessions().begin_turn(&acme).await.unwrap();
        assert_eq!(turn.memory().entries()[0].content, "again");
    }

    #[tokio::test]
    async fn missing_integration_surfaces_before_any_agent_call() {
        let llm = ScriptedLlm::echo();
        let (service, platform) = service(llm).await;
        let err = service
            .chat(&TenantId::new("nobody"), "hi", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialMissing { .. }));
        assert_eq!(platform.call_count(), 0);
    }

    #[tokio::test]
    async fn reconnected_integration_is_used_after_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let acme = TenantId::new("acme");
        store
            .put_tenant(&acme, "tok-old", "act_1", BusinessProfile::new("Acme", "leads"))
            .await;
        let platform = Arc::new(RecordingPlatform::with_responder(|token, _| {
            if token == "tok-old" {
                Err(PlatformError::Unauthorized {
                    reason: "Error validating access token".into(),
                })
            } else {
                Ok(json!({ "clicks": 42 }))
            }
        }));
        let llm = ScriptedLlm::new([
            tool_step("call_1", "get_metrics", json!({"date": "yesterday"})),
            tool_step("call_2", "get_metrics", json!({"date": "yesterday"})),
        ]);
        let service = ChatService::new(
            AgentConfig::default(),
            store.clone(),
            platform.clone(),
            AgentFactory::new(Arc::new(llm)),
        );

        let err = service
            .chat(&acme, "clicks yesterday?", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IntegrationExpired { .. }));

        store.put_integration(&acme, "tok-new", Some("act_1")).await;
        let result = service
            .chat(&acme, "try again", CancellationToken::new())
            .await
            .unwrap();
        assert!(result.reply.contains("42"));

        let tokens: Vec<String> = platform.calls().into_iter().map(|c| c.token).collect();
        assert_eq!(tokens, vec!["tok-old", "tok-new"]);

        let turn = service.sessions().begin_turn(&acme).await.unwrap();
        assert_eq!(turn.memory().entries()[0].content, "clicks yesterday?");
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_sessions() {
        let store = Arc::new(InMemoryStore::new());
        let acme = TenantId::new("acme");
        store
            .put_tenant(&acme, "tok", "act_1", BusinessProfile::new("Acme", "leads"))
            .await;
        let config = AgentConfig {
            session_idle_timeout: Duration::ZERO,
            sweep_interval: Duration::from_millis(20),
            ..AgentConfig::default()
        };
        let service = ChatService::new(
            config,
            store,
            Arc::new(RecordingPlatform::new()),
            AgentFactory::new(Arc::new(ScriptedLlm::echo())),
        );

        service
            .chat(&acme, "hi", CancellationToken::new())
            .await
            .unwrap();
        let sweeper = service.spawn_idle_sweeper();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!service.sessions().contains(&acme).await);
        sweeper.abort();
    }
}
