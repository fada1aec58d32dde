//! Core type definitions for the agent server.
//!
//! This module contains the data structures shared across the subsystems:
//!
//! - [`ToolResult`]: the uniform success/error envelope every tool returns
//! - [`ToolInvocation`]: a parsed request to run one tool
//! - [`ToolDescriptor`]: tool metadata as discovered from external servers
//! - [`ChatMessage`] / [`ChatRole`]: conversation history entries
//! - [`Part`]: multimodal prompt parts (text or base64 inline data)
//! - [`RunContext`]: the per-invocation bag passed from the loop into tools
//! - [`CancelFlag`]: cooperative cancellation shared across tasks
//!
//! The envelope is an in-band, never-throws contract: tools and transports
//! report their failures as [`ToolResult::Error`] so the model can read them
//! and adapt. True exceptions (security violations, malformed model output,
//! configuration problems) travel out-of-band as [`crate::Error`].

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// TOOL RESULT ENVELOPE
// ============================================================================

/// Result of one tool invocation.
///
/// Exactly two states exist; the executor converts every transport exception
/// into [`ToolResult::Error`] once retries are exhausted, so consumers never
/// see a third shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// The tool produced a payload for the next model turn.
    Success {
        /// Payload reinjected into the next model turn.
        content: String,
        /// Optional structured annotations (final URL, content type, ...).
        metadata: Option<BTreeMap<String, Value>>,
    },
    /// The tool failed; the description is fed back so the model can recover.
    Error {
        /// Human-readable failure description.
        content: String,
    },
}

impl ToolResult {
    /// Create a success result without metadata.
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult::Success {
            content: content.into(),
            metadata: None,
        }
    }

    /// Create a success result carrying metadata.
    pub fn success_with_metadata(
        content: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        ToolResult::Success {
            content: content.into(),
            metadata: Some(metadata),
        }
    }

    /// Create an error result.
    pub fn error(content: impl Into<String>) -> Self {
        ToolResult::Error {
            content: content.into(),
        }
    }

    /// Whether this is the success state.
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// The textual payload, regardless of state.
    pub fn content(&self) -> &str {
        match self {
            ToolResult::Success { content, .. } => content,
            ToolResult::Error { content } => content,
        }
    }
}

// ============================================================================
// TOOL INVOCATION AND DESCRIPTOR
// ============================================================================

/// A parsed request to invoke one tool, produced by the response parser and
/// consumed by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Registry name of the tool to run.
    pub tool_name: String,
    /// Arguments object, one entry per declared parameter.
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Tool metadata as discovered from an external tool server.
///
/// `parameters` is a JSON Schema fragment: an object with named properties,
/// each carrying a type tag and description, plus a required-names set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "inputSchema", alias = "input_schema")]
    pub parameters: Value,
}

// ============================================================================
// CONVERSATION MESSAGES
// ============================================================================

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of a conversation session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// MULTIMODAL PARTS
// ============================================================================

/// A multimodal prompt part in the backend's wire shape.
///
/// Text parts carry plain prompt text; inline-data parts carry a media
/// payload as base64, which is how the generate-content API accepts images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

/// Base64-encoded media payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Create an inline-data part from raw bytes, encoding them as base64.
    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }
}

// ============================================================================
// CANCELLATION AND RUN CONTEXT
// ============================================================================

/// Cooperative cancellation flag shared between a request and its tasks.
///
/// Cloning is cheap; all clones observe the same flag. Checked at every
/// suspension point of the agentic loop and inside long-running tools.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-invocation carrier of ambient services, passed from the loop to tools.
///
/// Immutable for the duration of one tool invocation. The log target scopes
/// a tool's log lines to the request that spawned it.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Session the enclosing request belongs to, when conversations are on.
    pub session_id: Option<String>,
    /// Target string tools should log under (`log::info!(target: ..)`).
    pub log_target: String,
    /// Cancellation flag of the enclosing request.
    pub cancel: CancelFlag,
}

impl RunContext {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            log_target: "vertex_agent::tool".to_string(),
            cancel: CancelFlag::new(),
        }
    }

    /// Attach a cancellation flag shared with the enclosing request.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}
