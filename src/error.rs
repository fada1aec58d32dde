//! Error types for the agent server

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the server
///
/// The variants mirror the failure domains of the system: configuration is
/// fatal at startup, security rejections are never retried, transport and
/// tool failures are retried and ultimately fed back to the model as error
/// results, and model-behavior failures surface as explanatory final answers.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration; fatal at startup
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// URL or redirect rejected by the security validator
    #[error("Security error: {0}")]
    Security(String),

    /// Tool execution failed after retries were exhausted
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// The model returned malformed tool-call syntax
    #[error("Model behavior error: {0}")]
    ModelBehavior(String),

    /// Transport-local I/O, timeout, or disconnect
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unknown tool, session, or document id
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error from the model backend
    #[error("API error: {0}")]
    Api(String),

    /// Invalid request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Deadline expired
    #[error("Request timeout")]
    Timeout,

    /// The enclosing request was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new security error
    pub fn security(msg: impl Into<String>) -> Self {
        Error::Security(msg.into())
    }

    /// Create a new tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::ToolExecution(msg.into())
    }

    /// Create a new model behavior error
    pub fn model_behavior(msg: impl Into<String>) -> Self {
        Error::ModelBehavior(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }
}
