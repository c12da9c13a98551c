use std::path::Path;
use std::sync::Arc;

use adgenius::agent::{AgentFactory, ChatService, Sampling};
use adgenius::api::{ApiState, chat_routes, cors_layer};
use adgenius::config::{AgentConfig, ModelConfig, ServerConfig};
use adgenius::llm::AnthropicProvider;
use adgenius::platform::MetaGraphClient;
use adgenius::store::LibSqlStore;
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let agent_config = AgentConfig::from_env()?;
    let model_config = ModelConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    eprintln!("📈 AdGenius v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model_config.model);
    eprintln!("   Chat API: http://0.0.0.0:{}/api/chat", server_config.port);

    // ── Collaborators ───────────────────────────────────────────────────
    let store = LibSqlStore::new_local(Path::new(&server_config.db_path))
        .await
        .with_context(|| format!("failed to open database at {}", server_config.db_path))?;
    eprintln!("   Database: {}", server_config.db_path);

    let platform = MetaGraphClient::new(server_config.graph_api_base.clone())?;
    let llm = AnthropicProvider::new(model_config.api_key.clone(), model_config.model.clone())?;

    let factory = AgentFactory::new(Arc::new(llm)).with_sampling(Sampling {
        temperature: model_config.temperature,
        max_tokens: model_config.max_tokens,
    });

    // ── Sessions ────────────────────────────────────────────────────────
    let service = Arc::new(ChatService::new(
        agent_config,
        Arc::new(store),
        Arc::new(platform),
        factory,
    ));
    let _sweeper = service.spawn_idle_sweeper();

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = chat_routes(ApiState {
        service: Arc::clone(&service),
    })
    .layer(cors_layer(&server_config.frontend_origins));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "Chat server started");
    axum::serve(listener, app).await?;

    Ok(())
}
