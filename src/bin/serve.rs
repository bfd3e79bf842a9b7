//! Demo server binary: wires the agent execution core's collaborators
//! together and exposes them over HTTP — tracing init, environment-driven
//! config load, router assembly, and the listener loop.

use std::sync::Arc;

use openagent_core::agent::CoreConfig;
use openagent_core::files::InMemoryFileStore;
use openagent_core::history::SqlHistoryStore;
use openagent_core::llm::{OpenRouterClient, OpenRouterConfig};
use openagent_core::tools::{EchoTool, ReasoningTool, TimeTool, ToolRegistry, WebSearchStubTool};
use openagent_core::transport::{router, AppState};
use openagent_core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("openagent_core=debug".parse().unwrap()),
        )
        .init();

    tracing::info!("starting OpenAgent core server");

    let config = CoreConfig::from_env()?;
    let llm_config = OpenRouterConfig::from_env()?;
    let default_model_id = llm_config.default_model.clone();
    let llm = OpenRouterClient::new(llm_config)?;

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| openagent_core::Error::Config("DATABASE_URL is not set".to_string()))?;
    let pool = sqlx::PgPool::connect(&database_url).await?;

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(TimeTool);
    tools.register(ReasoningTool);
    tools.register_io_heavy(WebSearchStubTool);

    let state = Arc::new(AppState::new(
        Arc::new(SqlHistoryStore::new(pool)),
        Arc::new(InMemoryFileStore::new()),
        Arc::new(llm),
        Arc::new(tools),
        config,
        default_model_id,
    ));

    let app = router(state);

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
