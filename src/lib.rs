//! # Vertex Agent Server
//!
//! An agentic tool-orchestration server that stands between a local client
//! (speaking a JSON tool protocol over a byte stream) and a Vertex AI
//! Gemini backend. It exposes three capabilities — `query`, `search`,
//! `fetch` — and, for `query`, runs a bounded reasoning-and-tool-execution
//! loop: the model's text is parsed for `TOOL_CALL:` directives, the tools
//! run in parallel with retry and back-off, and their trust-tagged results
//! feed the next model turn until a final answer or the step budget.
//!
//! ## Key pieces
//!
//! - **Agentic loop** ([`AgentLoop`]): turn-bounded controller with strict
//!   trust-boundary tagging of untrusted tool output.
//! - **Tool registry and executor** ([`ToolRegistry`], [`execute_all`]):
//!   uniform invocables over heterogeneous tool sources, parallel fan-out
//!   with per-call retries.
//! - **External tool client** ([`ExternalToolClient`]): one interface over
//!   subprocess servers (newline-delimited JSON-RPC on stdio) and HTTP
//!   tool servers, with request correlation, timeouts, and orderly
//!   shutdown.
//! - **Web fetch** ([`WebFetchTool`]): SSRF-hardened HTTPS fetch with
//!   manual redirect validation and HTML text extraction.
//! - **Sessions** ([`SessionStore`]): bounded conversation histories with
//!   idle expiry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vertex_agent::{
//!     AgentLoop, Handlers, ProtocolServer, SessionStore, Settings, ToolRegistry, VertexClient,
//!     WebFetchTool,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let llm = Arc::new(VertexClient::new(&settings)?);
//!
//!     let mut registry = ToolRegistry::new(settings.system_prompt.clone());
//!     registry.register(Arc::new(WebFetchTool::new()?))?;
//!     let registry = Arc::new(registry);
//!
//!     let sessions = Arc::new(SessionStore::new(
//!         std::time::Duration::from_secs(settings.session_timeout_secs),
//!         settings.max_history,
//!     ));
//!
//!     let agent = AgentLoop::new(
//!         llm.clone(),
//!         settings.max_reasoning_steps,
//!         settings.enable_reasoning,
//!     );
//!     let handlers = Handlers::new(
//!         llm,
//!         agent,
//!         registry,
//!         sessions,
//!         settings.enable_conversations,
//!         settings.model.clone(),
//!     );
//!
//!     let server = ProtocolServer::new(Arc::new(handlers));
//!     server.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

/// Agentic loop: bounded model-turn / tool-execution alternation.
mod agent;

/// Configuration loaded from the environment.
mod config;

/// Error types and the crate-wide `Result` alias.
mod error;

/// Parallel tool executor with per-call retry and back-off.
mod executor;

/// Request handlers for `query`, `search`, and `fetch`.
mod handlers;

/// Model backend trait and the Vertex AI Gemini client.
mod llm;

/// External tool client aggregating the configured transports.
mod mcp;

/// Parser for the model's textual tool-call grammar.
mod parser;

/// URL security validation (SSRF guards).
mod security;

/// Client-facing protocol server.
mod server;

/// Conversation session store with idle expiry.
mod session;

/// Tool trait, registry, and manifest rendering.
mod tools;

/// Wire transports for external tool servers (stdio and HTTP).
mod transport;

/// Core data model: result envelopes, messages, parts, run context.
mod types;

/// Built-in SSRF-hardened web fetch tool.
mod web_fetch;

// --- Public API ---

pub use agent::AgentLoop;
pub use config::{McpServerConfig, Settings};
pub use error::{Error, Result};
pub use executor::{DEFAULT_MAX_RETRIES, execute_all};
pub use handlers::Handlers;
pub use llm::{LanguageModel, QueryOptions, VertexClient};
pub use mcp::ExternalToolClient;
pub use parser::{ParsedResponse, parse_response, render_tool_call};
pub use security::{validate_redirect, validate_url};
pub use server::ProtocolServer;
pub use session::SessionStore;
pub use tools::{Tool, ToolRegistry};
pub use transport::{HttpTransport, NdjsonFramer, StdioTransport};
pub use types::{
    CancelFlag, ChatMessage, ChatRole, InlineData, Part, RunContext, ToolDescriptor,
    ToolInvocation, ToolResult,
};
pub use web_fetch::WebFetchTool;

/// The most commonly used types and functions in one import.
pub mod prelude {
    pub use crate::{
        AgentLoop, CancelFlag, ChatMessage, ChatRole, Error, ExternalToolClient, Handlers,
        LanguageModel, Part, ProtocolServer, QueryOptions, Result, RunContext, SessionStore,
        Settings, Tool, ToolInvocation, ToolRegistry, ToolResult, WebFetchTool, execute_all,
        parse_response,
    };
}
