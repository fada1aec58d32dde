//! The agentic loop: bounded alternation of model turns and tool execution.
//!
//! Each turn assembles a prompt from the tool manifest, the session history,
//! the user's message, and every trust-tagged tool output accumulated so
//! far, then asks the model for text. Parsed tool calls are executed in
//! parallel and fed back; a turn with no calls is the final answer. The
//! loop never makes more than `max_iterations` model calls.
//!
//! Tool output enters the prompt only through `TOOL_RESULT`/`TOOL_ERROR`
//! blocks whose payloads were trust-tagged at the source, so externally
//! authored bytes cannot pose as instructions.

use crate::executor::execute_all;
use crate::llm::{LanguageModel, QueryOptions};
use crate::parser::parse_response;
use crate::session::SessionStore;
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, Part, RunContext, ToolResult};
use crate::{Error, Result};
use std::sync::Arc;

/// Bounded turn controller driving one `query` request.
pub struct AgentLoop {
    llm: Arc<dyn LanguageModel>,
    max_iterations: u32,
    enable_reasoning: bool,
    max_retries: u32,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LanguageModel>, max_iterations: u32, enable_reasoning: bool) -> Self {
        Self {
            llm,
            max_iterations: max_iterations.max(1),
            enable_reasoning,
            max_retries: crate::executor::DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the per-tool-call attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Run the loop to a final answer.
    ///
    /// `session` carries the store and session id when conversations are
    /// enabled; the history is snapshotted once at the start, the user
    /// message is recorded immediately, and the final answer is recorded on
    /// completion. `parts` are honored only on the first turn.
    pub async fn run(
        &self,
        registry: &ToolRegistry,
        session: Option<(&SessionStore, &str)>,
        prompt: &str,
        parts: &[Part],
        ctx: &RunContext,
    ) -> Result<String> {
        let history = match session {
            Some((store, id)) => {
                let history = store.history(id);
                store.append(id, ChatMessage::user(prompt));
                history
            }
            None => Vec::new(),
        };

        let manifest = registry.definitions_text();
        let options = QueryOptions {
            enable_thinking: self.enable_reasoning,
        };

        let mut tool_context: Vec<String> = Vec::new();
        let mut last_assistant_text: Option<String> = None;

        for turn in 1..=self.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(Error::cancelled("query aborted before model call"));
            }

            let assembled = assemble_prompt(&manifest, &history, prompt, &tool_context);
            let turn_parts: &[Part] = if turn == 1 { parts } else { &[] };

            log::debug!(
                target: &ctx.log_target,
                "turn {}/{}: prompt {} chars, {} tool output(s)",
                turn,
                self.max_iterations,
                assembled.len(),
                tool_context.len()
            );

            let text = self.llm.query(&assembled, &options, turn_parts).await?;

            let parsed = match parse_response(&text) {
                Ok(parsed) => parsed,
                Err(Error::ModelBehavior(reason)) => {
                    // Surface as a final answer; the turn is not retried.
                    let answer = format!("The model produced a malformed tool call: {}", reason);
                    finish_session(session, &answer);
                    return Ok(answer);
                }
                Err(e) => return Err(e),
            };

            if !parsed.has_calls() {
                let answer = parsed.final_text.unwrap_or_default();
                finish_session(session, &answer);
                return Ok(answer);
            }

            if let Some(text) = parsed.final_text {
                last_assistant_text = Some(text);
            }

            let names: Vec<String> = parsed
                .calls
                .iter()
                .map(|c| c.tool_name.clone())
                .collect();
            log::info!(
                target: &ctx.log_target,
                "turn {}: executing {} tool call(s): {}",
                turn,
                names.len(),
                names.join(", ")
            );

            let results = execute_all(registry, &parsed.calls, ctx, self.max_retries).await?;

            if ctx.cancel.is_cancelled() {
                // In-flight work finished above; its results are discarded.
                return Err(Error::cancelled("query aborted after tool execution"));
            }

            for (name, result) in names.iter().zip(results) {
                tool_context.push(render_tool_output(name, &result));
            }
        }

        let answer = exhausted_answer(self.max_iterations, last_assistant_text.as_deref());
        finish_session(session, &answer);
        Ok(answer)
    }
}

/// Record the final answer in the session, when one is attached.
fn finish_session(session: Option<(&SessionStore, &str)>, answer: &str) {
    if let Some((store, id)) = session {
        store.append(id, ChatMessage::assistant(answer));
    }
}

/// Build one turn's prompt: manifest, history, user message, accumulated
/// tool outputs.
fn assemble_prompt(
    manifest: &str,
    history: &[ChatMessage],
    prompt: &str,
    tool_context: &[String],
) -> String {
    let mut assembled = String::from(manifest);
    assembled.push('\n');

    if !history.is_empty() {
        assembled.push_str("\nConversation so far:\n");
        for message in history {
            let role = match message.role {
                crate::types::ChatRole::User => "User",
                crate::types::ChatRole::Assistant => "Assistant",
            };
            assembled.push_str(&format!("{}: {}\n", role, message.content));
        }
    }

    assembled.push_str(&format!("\nUser: {}\n", prompt));

    for output in tool_context {
        assembled.push('\n');
        assembled.push_str(output);
        assembled.push('\n');
    }

    assembled
}

/// Format one tool result for reinjection into the prompt.
fn render_tool_output(name: &str, result: &ToolResult) -> String {
    match result {
        ToolResult::Success { content, .. } => format!("TOOL_RESULT[{}]:\n{}", name, content),
        ToolResult::Error { content } => format!("TOOL_ERROR[{}]:\n{}", name, content),
    }
}

/// Final answer when the turn budget runs out.
fn exhausted_answer(max_iterations: u32, last_text: Option<&str>) -> String {
    match last_text.filter(|t| !t.is_empty()) {
        Some(text) => format!(
            "Reached the maximum of {} reasoning steps. Last progress: {}",
            max_iterations, text
        ),
        None => format!(
            "Reached the maximum of {} reasoning steps without a final answer.",
            max_iterations
        ),
    }
}
