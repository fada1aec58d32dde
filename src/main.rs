//! Server binary: wire the core onto stdin/stdout.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use vertex_agent::{
    AgentLoop, ExternalToolClient, Handlers, ProtocolServer, SessionStore, Settings, ToolRegistry,
    VertexClient, WebFetchTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration problems are the one fatal startup condition.
    let settings = Settings::from_env().context("loading configuration")?;
    init_logging(&settings);

    log::info!(
        "starting vertex-agent-server (model={}, location={}, {} mcp server(s))",
        settings.model,
        settings.location,
        settings.mcp_servers.len()
    );

    let llm = Arc::new(VertexClient::new(&settings).context("building model client")?);

    let mut external = ExternalToolClient::new();
    external.initialize(&settings.mcp_servers).await;

    let mut registry = ToolRegistry::new(settings.system_prompt.clone());
    registry
        .register(Arc::new(WebFetchTool::new().context("building web fetch tool")?))
        .context("registering web_fetch")?;
    registry.register_all(external.discover().await);
    let registry = Arc::new(registry);

    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(settings.session_timeout_secs),
        settings.max_history,
    ));

    let agent = AgentLoop::new(
        llm.clone(),
        settings.max_reasoning_steps,
        settings.enable_reasoning,
    );
    let handlers = Handlers::new(
        llm,
        agent,
        registry,
        sessions,
        settings.enable_conversations,
        settings.model.clone(),
    );

    let server = ProtocolServer::new(Arc::new(handlers));
    let outcome = server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await;

    // Child processes are killed on every exit path.
    external.shutdown().await;

    outcome.context("serving client protocol")?;
    log::info!("client stream closed, shutting down");
    Ok(())
}

/// Wire the `log` facade. Tool-protocol traffic owns stdout, so log output
/// always goes to stderr; `LOG_TO_STDERR` simply raises the default level.
fn init_logging(settings: &Settings) {
    if settings.disable_logging {
        return;
    }

    let default_level = if settings.log_to_stderr { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    );
    builder.target(env_logger::Target::Stderr);
    builder.init();

    if let Some(dir) = &settings.log_dir {
        // The file sink lives in the supervising process; record the intent.
        log::debug!("log directory configured at {}", dir);
    }
}
