//! Client-facing protocol server.
//!
//! Speaks newline-delimited JSON over any byte stream (stdin/stdout in
//! production). Requests name one of `query`, `search`, `fetch`, or the
//! `tools/list` discovery call; every tool reply is a
//! `{content: [{type: "text", text}]}` object inside a JSON-RPC-style
//! result envelope. Handler failures are converted to error text in the
//! same shape, so the client always receives a well-formed response.
//!
//! Requests are served in arrival order; a line that does not parse as a
//! JSON object is logged and dropped (there is no id to answer to). EOF
//! ends the serve loop.

use crate::handlers::Handlers;
use crate::types::CancelFlag;
use crate::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// NDJSON request dispatcher over a byte stream.
pub struct ProtocolServer {
    handlers: Arc<Handlers>,
}

impl ProtocolServer {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        Self { handlers }
    }

    /// Serve requests until EOF on the reader.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::transport(format!("client stream read failed: {}", e)))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let request: Value = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("Dropping unparseable request line ({}): {}", e, line);
                    continue;
                }
            };

            let id = request.get("id").cloned();
            let method = request
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

            log::info!("request: method={}", method);
            let result = self.dispatch(&method, &params).await;

            // A request without an id is a notification; nothing to answer.
            let Some(id) = id else {
                continue;
            };

            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            let mut payload = reply.to_string();
            payload.push('\n');
            writer
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| Error::transport(format!("client stream write failed: {}", e)))?;
            writer
                .flush()
                .await
                .map_err(|e| Error::transport(format!("client stream flush failed: {}", e)))?;
        }

        Ok(())
    }

    async fn dispatch(&self, method: &str, params: &Value) -> Value {
        match method {
            "tools/list" => self.handlers.tools_manifest(),
            "query" => {
                let cancel = CancelFlag::new();
                text_reply(self.handlers.handle_query(params, cancel).await)
            }
            "search" => text_reply(self.handlers.handle_search(params).await),
            "fetch" => text_reply(self.handlers.handle_fetch(params).await),
            other => text_reply(Err(Error::invalid_input(format!(
                "unknown method '{}'",
                other
            )))),
        }
    }
}

/// Wrap a handler outcome as the single-text content response the protocol
/// promises for every request.
fn text_reply(outcome: Result<String>) -> Value {
    let text = match outcome {
        Ok(text) => text,
        Err(e) => {
            log::warn!("request failed: {}", e);
            format!("Error: {}", e)
        }
    };
    json!({"content": [{"type": "text", "text": text}]})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLoop;
    use crate::llm::{LanguageModel, QueryOptions};
    use crate::session::SessionStore;
    use crate::tools::ToolRegistry;
    use crate::types::Part;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    struct CannedModel {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn query(
            &self,
            _prompt: &str,
            _options: &QueryOptions,
            _parts: &[Part],
        ) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::api("script exhausted"))
        }
    }

    fn server_with(responses: &[&str]) -> ProtocolServer {
        let model = Arc::new(CannedModel {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
        });
        let agent = AgentLoop::new(model.clone(), 5, false);
        let handlers = Handlers::new(
            model,
            agent,
            Arc::new(ToolRegistry::new(None)),
            Arc::new(SessionStore::new(Duration::from_secs(3600), 10)),
            false,
            "gemini-1.5-flash-002".to_string(),
        );
        ProtocolServer::new(Arc::new(handlers))
    }

    /// Drive the server over an in-memory stream and collect its replies.
    async fn exchange(server: &ProtocolServer, input: &str) -> Vec<Value> {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (mut client_read, mut client_write) = tokio::io::split(client_side);

        let input = input.to_string();
        let writer = tokio::spawn(async move {
            client_write.write_all(input.as_bytes()).await.unwrap();
            client_write.shutdown().await.unwrap();
        });

        server.serve(server_read, server_write).await.unwrap();
        writer.await.unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_query_request_reply_shape() {
        let server = server_with(&["4"]);
        let replies = exchange(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"query\",\"params\":{\"prompt\":\"2+2?\"}}\n",
        )
        .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(
            replies[0]["result"]["content"][0],
            json!({"type": "text", "text": "4"})
        );
    }

    #[tokio::test]
    async fn test_tools_list_discovery() {
        let server = server_with(&[]);
        let replies = exchange(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"tools/list\",\"params\":{}}\n",
        )
        .await;

        let tools = replies[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 3);
    }

    #[tokio::test]
    async fn test_error_becomes_text_reply() {
        let server = server_with(&[]);
        let replies = exchange(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"fetch\",\"params\":{\"id\":\"doc-0-0\"}}\n",
        )
        .await;

        let text = replies[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Error: Not found"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = server_with(&[]);
        let replies = exchange(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"destroy\",\"params\":{}}\n",
        )
        .await;

        let text = replies[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("unknown method 'destroy'"));
    }

    #[tokio::test]
    async fn test_garbage_lines_dropped_and_notifications_silent() {
        let server = server_with(&["hello"]);
        let replies = exchange(
            &server,
            "this is not json\n\
{\"jsonrpc\":\"2.0\",\"method\":\"query\",\"params\":{\"prompt\":\"no id\"}}\n\
{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"search\",\"params\":{}}\n",
        )
        .await;

        // Only the id-carrying request is answered.
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 4);
        let text = replies[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Error: Invalid input"));
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let server = server_with(&["first", "second"]);
        let replies = exchange(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"query\",\"params\":{\"prompt\":\"a\"}}\n\
{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"query\",\"params\":{\"prompt\":\"b\"}}\n",
        )
        .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[0]["result"]["content"][0]["text"], "first");
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["content"][0]["text"], "second");
    }
}
