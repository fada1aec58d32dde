//! Parallel tool executor with per-call retry and back-off.
//!
//! All calls in a batch run concurrently; each call retries internally with
//! linear back-off (1000 ms × attempt). A failing call never cancels its
//! siblings, and results come back positionally aligned with the input
//! regardless of completion order.
//!
//! Security violations and cancellations are the exceptions to the in-band
//! error contract: neither is retried or wrapped as an error envelope; they
//! abort the batch and propagate to the request handler.

use crate::tools::ToolRegistry;
use crate::types::{RunContext, ToolInvocation, ToolResult};
use crate::{Error, Result};
use futures::future::join_all;
use std::time::Duration;

/// Default attempt budget per call.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Execute a batch of tool calls concurrently.
///
/// The returned sequence has the same length and order as `calls`. Unknown
/// tools short-circuit to an error envelope without retries.
pub async fn execute_all(
    registry: &ToolRegistry,
    calls: &[ToolInvocation],
    ctx: &RunContext,
    max_retries: u32,
) -> Result<Vec<ToolResult>> {
    let futures = calls
        .iter()
        .map(|call| execute_one(registry, call, ctx, max_retries));
    join_all(futures).await.into_iter().collect()
}

/// Run one call through its attempt budget.
async fn execute_one(
    registry: &ToolRegistry,
    call: &ToolInvocation,
    ctx: &RunContext,
    max_retries: u32,
) -> Result<ToolResult> {
    let Some(tool) = registry.get(&call.tool_name) else {
        return Ok(ToolResult::error(format!(
            "Tool '{}' not found",
            call.tool_name
        )));
    };

    let mut last_error = String::new();

    for attempt in 1..=max_retries.max(1) {
        if ctx.cancel.is_cancelled() {
            return Err(Error::cancelled(format!(
                "tool '{}' skipped",
                call.tool_name
            )));
        }

        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(result @ ToolResult::Success { .. }) => {
                log::debug!(
                    target: &ctx.log_target,
                    "{} succeeded on attempt {}",
                    call.tool_name,
                    attempt
                );
                return Ok(result);
            }
            Ok(ToolResult::Error { content }) => {
                log::warn!(
                    target: &ctx.log_target,
                    "{} attempt {} failed: {}",
                    call.tool_name,
                    attempt,
                    content
                );
                last_error = content;
            }
            Err(e @ (Error::Security(_) | Error::Cancelled(_))) => return Err(e),
            Err(e) => {
                log::warn!(
                    target: &ctx.log_target,
                    "{} attempt {} failed: {}",
                    call.tool_name,
                    attempt,
                    e
                );
                last_error = e.to_string();
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(Duration::from_millis(1000 * u64::from(attempt))).await;
        }
    }

    Ok(ToolResult::error(format!(
        "Tool execution failed after {} attempts: {}",
        max_retries, last_error
    )))
}
