//! Wire transports for external tool servers.
//!
//! Two transports exist behind the same `list_tools` / `call_tool` surface:
//!
//! - [`StdioTransport`]: owns a spawned child process and drives it with
//!   newline-delimited JSON-RPC on stdin/stdout. Requests are correlated by
//!   a per-transport monotonic id through a pending map; every outstanding
//!   request carries a 30 s deadline. stderr lines are logged under the
//!   server's name.
//! - [`HttpTransport`]: stateless client for an HTTP-reachable tool server,
//!   POSTing to `/tools/list` and `/tools/call`.
//!
//! Framing rule (stdio): one JSON object per LF-terminated line outbound;
//! inbound bytes are buffered and split at LF, the trailing incomplete
//! segment kept for the next chunk. A segment that does not parse as a JSON
//! object is logged and discarded.

use crate::types::{ToolDescriptor, ToolResult};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

/// Deadline for one subprocess RPC round trip.
const RPC_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for one HTTP tool-server round trip.
const HTTP_DEADLINE: Duration = Duration::from_secs(30);

/// Longest body excerpt quoted in HTTP error results.
const BODY_EXCERPT_LEN: usize = 200;

// ============================================================================
// FRAMING
// ============================================================================

/// Buffers raw bytes and yields one complete line per LF.
///
/// The trailing incomplete segment is retained until the next push, so a
/// JSON object split across reads is reassembled before parsing.
#[derive(Debug, Default)]
pub struct NdjsonFramer {
    buf: Vec<u8>,
}

impl NdjsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every newly completed line, newline stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the LF
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        lines
    }
}

// ============================================================================
// JSON-RPC SHAPES
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// Render a `tools/call` result object as a [`ToolResult::Success`] payload.
///
/// String content passes through unchanged; anything else is serialized.
fn result_to_tool_result(result: Value) -> ToolResult {
    let content = match result.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => result.to_string(),
    };
    ToolResult::success(content)
}

/// Parse the `tools` array out of a `tools/list` result, tolerating absence.
fn parse_tool_list(result: Value) -> Vec<ToolDescriptor> {
    match result.get("tools") {
        Some(tools) => serde_json::from_value(tools.clone()).unwrap_or_else(|e| {
            log::warn!("Malformed tools/list payload: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    }
}

// ============================================================================
// STDIO TRANSPORT
// ============================================================================

/// What the reader task hands back for one correlated request: the remote
/// answered (with a result or a JSON-RPC error object), or the transport
/// itself failed.
#[derive(Debug)]
enum RpcOutcome {
    Result(Value),
    RemoteError(String),
}

type PendingMap = std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<RpcOutcome>>>>;

/// Transport for one spawned tool-server subprocess.
///
/// The transport exclusively owns the child and its pipes. `close()` is
/// idempotent: it kills the child and drains the pending map with a
/// cancellation error; disconnects do the same with a transport error.
pub struct StdioTransport {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    deadline: Duration,
}

impl StdioTransport {
    /// Spawn the configured command and wire up the stdout/stderr readers.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Arc<Self>> {
        Self::connect_with_deadline(name, command, args, env, RPC_DEADLINE).await
    }

    async fn connect_with_deadline(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        deadline: Duration,
    ) -> Result<Arc<Self>> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transport(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::transport("child stderr unavailable"))?;

        let transport = Arc::new(Self {
            name: name.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            connected: Arc::new(AtomicBool::new(true)),
            deadline,
        });

        tokio::spawn(read_stdout(
            transport.name.clone(),
            stdout,
            Arc::clone(&transport.pending),
            Arc::clone(&transport.connected),
        ));
        tokio::spawn(read_stderr(transport.name.clone(), stderr));

        log::info!("Connected stdio tool server '{}'", name);
        Ok(transport)
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Issue one JSON-RPC request and await its correlated response.
    async fn request(&self, method: &str, params: Value) -> Result<RpcOutcome> {
        if !self.is_connected() {
            return Err(Error::transport(format!(
                "server '{}' is not connected",
                self.name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        let line = {
            let request = RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            };
            let mut line = serde_json::to_string(&request)?;
            line.push('\n');
            line
        };

        // Writes are serialized: one message in flight on stdin at a time.
        {
            let mut stdin = self.stdin.lock().await;
            let Some(stdin) = stdin.as_mut() else {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                return Err(Error::transport(format!(
                    "server '{}' stdin is closed",
                    self.name
                )));
            };
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                return Err(Error::transport(format!(
                    "write to server '{}' failed: {}",
                    self.name, e
                )));
            }
        }

        match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::transport(format!(
                "server '{}' dropped the request",
                self.name
            ))),
            Err(_) => {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                Err(Error::timeout())
            }
        }
    }

    /// Discover the tools this server offers.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        match self.request("tools/list", json!({})).await? {
            RpcOutcome::Result(result) => Ok(parse_tool_list(result)),
            RpcOutcome::RemoteError(message) => Err(Error::transport(format!(
                "server '{}' tools/list failed: {}",
                self.name, message
            ))),
        }
    }

    /// Invoke one tool. Server-reported failures become error envelopes;
    /// transport-level failures surface as `Err` so the executor can retry.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolResult> {
        log::debug!("[{}] tools/call {}", self.name, tool);
        let outcome = self
            .request("tools/call", json!({"name": tool, "arguments": arguments}))
            .await;

        match outcome {
            Ok(RpcOutcome::Result(result)) => {
                let result = result_to_tool_result(result);
                log::debug!("[{}] {} -> success", self.name, tool);
                Ok(result)
            }
            Ok(RpcOutcome::RemoteError(message)) => {
                log::debug!("[{}] {} -> error: {}", self.name, tool, message);
                Ok(ToolResult::error(message))
            }
            Err(e) => {
                log::warn!("[{}] {} failed: {}", self.name, tool, e);
                Err(e)
            }
        }
    }

    /// Terminate the child and drain pending requests with a cancellation
    /// error. Idempotent.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill server '{}': {}", self.name, e);
            }
        }

        drain_pending(&self.pending, || {
            Error::cancelled(format!("transport '{}' closed", self.name))
        });
        log::info!("Closed stdio tool server '{}'", self.name);
    }
}

/// Fail every outstanding request with an error from `make_error`.
fn drain_pending(pending: &PendingMap, make_error: impl Fn() -> Error) {
    let senders: Vec<_> = {
        let mut pending = pending.lock().expect("pending lock poisoned");
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in senders {
        let _ = tx.send(Err(make_error()));
    }
}

/// Stdout reader: frame, parse, and route responses to their continuations.
async fn read_stdout(
    name: String,
    mut stdout: tokio::process::ChildStdout,
    pending: Arc<PendingMap>,
    connected: Arc<AtomicBool>,
) {
    let mut framer = NdjsonFramer::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::error!("[{}] stdout read failed: {}", name, e);
                break;
            }
        };

        for line in framer.push(&chunk[..n]) {
            let response: RpcResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(e) => {
                    log::warn!("[{}] discarding unparseable line ({}): {}", name, e, line);
                    continue;
                }
            };

            let Some(id) = response.id else {
                log::warn!("[{}] discarding response without id", name);
                continue;
            };

            let sender = pending.lock().expect("pending lock poisoned").remove(&id);
            let Some(sender) = sender else {
                log::warn!("[{}] dropping duplicate or unknown response id {}", name, id);
                continue;
            };

            let outcome = if let Some(error) = response.error {
                Ok(RpcOutcome::RemoteError(error.message))
            } else {
                Ok(RpcOutcome::Result(response.result.unwrap_or(Value::Null)))
            };
            let _ = sender.send(outcome);
        }
    }

    // Disconnected: no response can arrive for anything still pending.
    connected.store(false, Ordering::SeqCst);
    drain_pending(&pending, || {
        Error::transport(format!("server '{}' disconnected", name))
    });
    log::info!("Stdio tool server '{}' disconnected", name);
}

/// Stderr reader: every line is logged at error level under the server name.
async fn read_stderr(name: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::error!("[{}] {}", name, line);
    }
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

/// Stateless transport for an HTTP-reachable tool server.
pub struct HttpTransport {
    name: String,
    base_url: String,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(name: &str, url: &str, headers: BTreeMap<String, String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_DEADLINE)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            name: name.to_string(),
            base_url: url.trim_end_matches('/').to_string(),
            headers,
            http,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(&body);
        // Configured headers merge over the defaults.
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder.send().await.map_err(Error::Http)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let response = self.post("/tools/list", json!({})).await?;
        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "server '{}' tools/list returned HTTP {}",
                self.name,
                response.status().as_u16()
            )));
        }
        let result: Value = response.json().await.map_err(Error::Http)?;
        Ok(parse_tool_list(result))
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolResult> {
        log::debug!("[{}] POST /tools/call {}", self.name, tool);
        let response = self
            .post("/tools/call", json!({"name": tool, "arguments": arguments}))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            return Ok(ToolResult::error(format!(
                "HTTP {}: {}",
                status.as_u16(),
                excerpt
            )));
        }

        let result: Value = response.json().await.map_err(Error::Http)?;
        Ok(result_to_tool_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_single_line() {
        let mut framer = NdjsonFramer::new();
        let lines = framer.push(b"{\"id\":1}\n");
        assert_eq!(lines, vec!["{\"id\":1}"]);
    }

    #[test]
    fn test_framer_partial_then_completion() {
        // One chunk carries a complete message plus the head of the next;
        // the second chunk completes it.
        let mut framer = NdjsonFramer::new();
        let first = framer.push(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n{\"jsonrpc\"");
        assert_eq!(
            first,
            vec!["{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}"]
        );

        let second = framer.push(b":\"2.0\",\"id\":2,\"result\":{\"ok\":false}}\n");
        assert_eq!(
            second,
            vec!["{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":false}}"]
        );
    }

    #[test]
    fn test_framer_multiple_lines_one_chunk() {
        let mut framer = NdjsonFramer::new();
        let lines = framer.push(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_framer_strips_crlf_and_skips_blank_lines() {
        let mut framer = NdjsonFramer::new();
        let lines = framer.push(b"{\"id\":1}\r\n\n{\"id\":2}\n");
        assert_eq!(lines, vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn test_rpc_request_wire_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "tools/list",
            params: json!({}),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}})
        );
    }

    #[test]
    fn test_result_to_tool_result_string_content() {
        let result = result_to_tool_result(json!({"content": "plain text"}));
        assert_eq!(result, ToolResult::success("plain text"));
    }

    #[test]
    fn test_result_to_tool_result_structured_content() {
        let result = result_to_tool_result(json!({"content": [{"type": "text", "text": "hi"}]}));
        assert_eq!(
            result.content(),
            "[{\"text\":\"hi\",\"type\":\"text\"}]"
        );
    }

    #[test]
    fn test_parse_tool_list_missing_is_empty() {
        assert!(parse_tool_list(json!({})).is_empty());
        let tools = parse_tool_list(json!({"tools": [{"name": "echo"}]}));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[cfg(unix)]
    mod stdio {
        use super::*;

        /// Shell one-liner tool server: reads a request line, answers it,
        /// reads another, answers that, then sleeps so the pipe stays open.
        const SCRIPTED_SERVER: &str = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo","description":"Echo input"}]}}\n'
read line
printf '{"jsonrpc":"2.0","id":2,"result":{"content":"echoed"}}\n'
sleep 5
"#;

        async fn connect_scripted(script: &str, deadline: Duration) -> Arc<StdioTransport> {
            StdioTransport::connect_with_deadline(
                "scripted",
                "/bin/sh",
                &["-c".to_string(), script.to_string()],
                &BTreeMap::new(),
                deadline,
            )
            .await
            .unwrap()
        }

        #[tokio::test]
        async fn test_list_then_call() {
            let transport = connect_scripted(SCRIPTED_SERVER, Duration::from_secs(5)).await;

            let tools = transport.list_tools().await.unwrap();
            assert_eq!(tools.len(), 1);
            assert_eq!(tools[0].name, "echo");

            let result = transport
                .call_tool("echo", json!({"text": "hi"}))
                .await
                .unwrap();
            assert_eq!(result, ToolResult::success("echoed"));

            transport.close().await;
            assert!(!transport.is_connected());
        }

        #[tokio::test]
        async fn test_rpc_error_becomes_error_envelope() {
            let script = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'
read line
printf '{"jsonrpc":"2.0","id":2,"error":{"message":"no such tool"}}\n'
sleep 5
"#;
            let transport = connect_scripted(script, Duration::from_secs(5)).await;
            let _ = transport.list_tools().await.unwrap();

            let result = transport.call_tool("missing", json!({})).await.unwrap();
            assert_eq!(result, ToolResult::error("no such tool"));
            transport.close().await;
        }

        #[tokio::test]
        async fn test_request_timeout_removes_pending() {
            // Server never answers; the deadline fires and the entry drains.
            let transport =
                connect_scripted("read line\nsleep 30\n", Duration::from_millis(100)).await;

            let err = transport.list_tools().await.unwrap_err();
            assert!(matches!(err, Error::Timeout));
            assert!(transport.pending.lock().unwrap().is_empty());
            transport.close().await;
        }

        #[tokio::test]
        async fn test_disconnect_fails_outstanding_requests() {
            // Server exits immediately after the first read; the pending
            // request is drained with a transport error.
            let transport = connect_scripted("read line\nexit 0\n", Duration::from_secs(5)).await;

            let err = transport.list_tools().await.unwrap_err();
            assert!(matches!(err, Error::Transport(_)), "{err:?}");
            assert!(!transport.is_connected());
        }

        #[tokio::test]
        async fn test_close_is_idempotent() {
            let transport = connect_scripted("sleep 30\n", Duration::from_secs(5)).await;
            transport.close().await;
            transport.close().await;
            assert!(!transport.is_connected());

            let err = transport.list_tools().await.unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
        }
    }
}
