//! Parser for the model's textual tool-call grammar.
//!
//! The model requests tool execution with line-oriented blocks:
//!
//! ```text
//! TOOL_CALL: <tool_name>
//! ARGUMENTS: <JSON object, single line or spanning to a balanced brace>
//! ```
//!
//! Multiple blocks may appear in one response. Text outside the blocks,
//! taken together, is the final answer; a response with zero blocks is all
//! final answer. Arguments whose JSON does not parse raise
//! [`Error::ModelBehavior`] rather than being silently dropped.

use crate::types::ToolInvocation;
use crate::{Error, Result};

/// Outcome of parsing one model response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
    /// Text outside any tool-call block; `None` when nothing remains.
    pub final_text: Option<String>,
    /// Tool calls in order of appearance.
    pub calls: Vec<ToolInvocation>,
}

impl ParsedResponse {
    /// Whether this turn needs tool execution.
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Parse raw model text into free text and tool invocations.
pub fn parse_response(text: &str) -> Result<ParsedResponse> {
    let lines: Vec<&str> = text.lines().collect();
    let mut free_lines: Vec<&str> = Vec::new();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        match keyword_value(line, "TOOL_CALL") {
            Some(tool_name) if !tool_name.is_empty() => {
                i += 1;
                // Blank lines between the pair are tolerated.
                while i < lines.len() && lines[i].trim().is_empty() {
                    i += 1;
                }
                let Some(args_start) = lines.get(i).and_then(|l| keyword_value(l, "ARGUMENTS"))
                else {
                    return Err(Error::model_behavior(format!(
                        "TOOL_CALL '{}' is not followed by an ARGUMENTS line",
                        tool_name
                    )));
                };

                let (raw_json, consumed) = collect_json(args_start, &lines[i + 1..]);
                i += 1 + consumed;

                let arguments: serde_json::Value =
                    serde_json::from_str(raw_json.trim()).map_err(|e| {
                        Error::model_behavior(format!(
                            "ARGUMENTS for '{}' is not valid JSON: {}",
                            tool_name, e
                        ))
                    })?;
                calls.push(ToolInvocation::new(tool_name, arguments));
            }
            _ => {
                free_lines.push(line);
                i += 1;
            }
        }
    }

    let final_text = {
        let joined = free_lines.join("\n").trim().to_string();
        (!joined.is_empty()).then_some(joined)
    };

    Ok(ParsedResponse { final_text, calls })
}

/// Render an invocation back into the model-facing grammar.
pub fn render_tool_call(call: &ToolInvocation) -> String {
    format!(
        "TOOL_CALL: {}\nARGUMENTS: {}",
        call.tool_name, call.arguments
    )
}

/// Match `KEYWORD : value` with whitespace tolerated around the colon;
/// returns the trimmed value.
fn keyword_value<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix(keyword)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim())
}

/// Collect the JSON payload starting on the `ARGUMENTS:` line itself and, if
/// its braces are not yet balanced, spanning into following lines. Returns
/// the payload and how many extra lines were consumed.
fn collect_json(first: &str, following: &[&str]) -> (String, usize) {
    let mut payload = first.to_string();
    let mut depth = brace_depth(first, 0);

    // A single-line payload (or one that never opens a brace) ends here.
    if depth.net <= 0 && depth.opened {
        return (payload, 0);
    }
    if !depth.opened {
        return (payload, 0);
    }

    for (consumed, line) in following.iter().enumerate() {
        payload.push('\n');
        payload.push_str(line);
        depth = brace_depth(line, depth.net);
        if depth.net <= 0 {
            return (payload, consumed + 1);
        }
    }

    (payload, following.len())
}

/// Net brace depth after scanning `line`, ignoring braces inside JSON
/// strings.
struct Depth {
    net: i32,
    opened: bool,
}

fn brace_depth(line: &str, start: i32) -> Depth {
    let mut net = start;
    let mut opened = start > 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                net += 1;
                opened = true;
            }
            '}' if !in_string => net -= 1,
            _ => {}
        }
    }

    Depth { net, opened }
}
