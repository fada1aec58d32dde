//! Configuration loaded from the environment.
//!
//! One [`Settings`] record drives the whole process: the model backend
//! coordinates, sampling parameters, the agentic-loop budget, session policy,
//! logging sinks, and the external tool-server roster. Everything has a
//! default except the backend project id; a missing or unparseable value is
//! a fatal [`Error::Config`] at startup.
//!
//! ## Environment variables
//!
//! | variable | option | default |
//! |---|---|---|
//! | `VERTEX_PROJECT_ID` | backend project | required |
//! | `VERTEX_LOCATION` | backend location | `global` |
//! | `VERTEX_MODEL` | model id | `gemini-1.5-flash-002` |
//! | `VERTEX_ACCESS_TOKEN` / `GOOGLE_ACCESS_TOKEN` | bearer token | empty |
//! | `VERTEX_TEMPERATURE` | sampling temperature | `1.0` |
//! | `VERTEX_MAX_TOKENS` | max output tokens | `8192` |
//! | `VERTEX_TOP_P` | nucleus sampling | `0.95` |
//! | `VERTEX_TOP_K` | top-k sampling | `40` |
//! | `SYSTEM_PROMPT` | manifest preamble | built-in |
//! | `ENABLE_CONVERSATIONS` | honor session ids | `false` |
//! | `SESSION_TIMEOUT` | idle TTL, seconds | `3600` |
//! | `MAX_HISTORY` | history messages retained | `10` |
//! | `ENABLE_REASONING` | pass thinking hint to the model | `false` |
//! | `MAX_REASONING_STEPS` | agentic-loop turn budget | `5` |
//! | `LOG_DIR`, `DISABLE_LOGGING`, `LOG_TO_STDERR` | logging sinks | unset |
//! | `MCP_SERVERS` | external tool servers, JSON list | `[]` |

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

/// Configuration for one external tool server.
///
/// Immutable after load. The `transport` tag selects between a long-lived
/// subprocess driven over stdin/stdout and an HTTP-reachable server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        name: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl McpServerConfig {
    /// The unique server name, regardless of transport.
    pub fn name(&self) -> &str {
        match self {
            McpServerConfig::Stdio { name, .. } => name,
            McpServerConfig::Http { name, .. } => name,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model backend project (required).
    pub project_id: String,
    /// Model backend location.
    pub location: String,
    /// Model id.
    pub model: String,
    /// Bearer token for the backend; empty means unauthenticated endpoints.
    pub access_token: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Nucleus sampling parameter.
    pub top_p: f64,
    /// Top-k sampling parameter.
    pub top_k: u32,
    /// Manifest preamble; `None` selects the built-in default.
    pub system_prompt: Option<String>,
    /// Whether session ids on `query` requests are honored.
    pub enable_conversations: bool,
    /// Idle TTL for sessions, in seconds.
    pub session_timeout_secs: u64,
    /// History messages retained per session.
    pub max_history: usize,
    /// Whether to pass the thinking hint to the model.
    pub enable_reasoning: bool,
    /// Hard ceiling on agentic-loop turns.
    pub max_reasoning_steps: u32,
    /// Directory for log files, when a file sink is wired externally.
    pub log_dir: Option<String>,
    /// Suppress all logging output.
    pub disable_logging: bool,
    /// Send log lines to stderr instead of the default sink.
    pub log_to_stderr: bool,
    /// External tool-server roster.
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "global".to_string(),
            model: "gemini-1.5-flash-002".to_string(),
            access_token: String::new(),
            temperature: 1.0,
            max_tokens: 8192,
            top_p: 0.95,
            top_k: 40,
            system_prompt: None,
            enable_conversations: false,
            session_timeout_secs: 3600,
            max_history: 10,
            enable_reasoning: false,
            max_reasoning_steps: 5,
            log_dir: None,
            disable_logging: false,
            log_to_stderr: false,
            mcp_servers: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `VERTEX_PROJECT_ID` is missing or any
    /// numeric/boolean/JSON value fails to parse.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let project_id = env::var("VERTEX_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::config("VERTEX_PROJECT_ID is required"))?;

        let access_token = env::var("VERTEX_ACCESS_TOKEN")
            .or_else(|_| env::var("GOOGLE_ACCESS_TOKEN"))
            .unwrap_or_default();

        let mcp_servers = match env::var("MCP_SERVERS") {
            Ok(raw) if !raw.trim().is_empty() => parse_mcp_servers(&raw)?,
            _ => Vec::new(),
        };

        Ok(Self {
            project_id,
            location: env_string("VERTEX_LOCATION", &defaults.location),
            model: env_string("VERTEX_MODEL", &defaults.model),
            access_token,
            temperature: env_parse("VERTEX_TEMPERATURE", defaults.temperature)?,
            max_tokens: env_parse("VERTEX_MAX_TOKENS", defaults.max_tokens)?,
            top_p: env_parse("VERTEX_TOP_P", defaults.top_p)?,
            top_k: env_parse("VERTEX_TOP_K", defaults.top_k)?,
            system_prompt: env::var("SYSTEM_PROMPT").ok().filter(|v| !v.is_empty()),
            enable_conversations: env_bool("ENABLE_CONVERSATIONS", defaults.enable_conversations)?,
            session_timeout_secs: env_parse("SESSION_TIMEOUT", defaults.session_timeout_secs)?,
            max_history: env_parse("MAX_HISTORY", defaults.max_history)?,
            enable_reasoning: env_bool("ENABLE_REASONING", defaults.enable_reasoning)?,
            max_reasoning_steps: env_parse("MAX_REASONING_STEPS", defaults.max_reasoning_steps)?,
            log_dir: env::var("LOG_DIR").ok().filter(|v| !v.is_empty()),
            disable_logging: env_bool("DISABLE_LOGGING", defaults.disable_logging)?,
            log_to_stderr: env_bool("LOG_TO_STDERR", defaults.log_to_stderr)?,
            mcp_servers,
        })
    }
}

/// Parse the `MCP_SERVERS` JSON list, rejecting duplicate server names.
pub(crate) fn parse_mcp_servers(raw: &str) -> Result<Vec<McpServerConfig>> {
    let servers: Vec<McpServerConfig> = serde_json::from_str(raw)
        .map_err(|e| Error::config(format!("MCP_SERVERS is not valid JSON: {}", e)))?;

    let mut seen = std::collections::BTreeSet::new();
    for server in &servers {
        if !seen.insert(server.name().to_string()) {
            return Err(Error::config(format!(
                "duplicate MCP server name '{}'",
                server.name()
            )));
        }
    }

    Ok(servers)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{} is invalid: {}", key, e))),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::config(format!(
                "{} must be a boolean, got '{}'",
                key, other
            ))),
        },
        _ => Ok(default),
    }
}
