//! External tool client.
//!
//! Aggregates the configured tool-server transports, discovers their tools,
//! and exposes each as a registry invocable named `mcp_{server}_{tool}`.
//! The client owns the transports; the wrapper invocables it emits hold
//! only weak references, so `shutdown()` genuinely tears everything down
//! even while wrappers are still registered.

use crate::config::McpServerConfig;
use crate::tools::Tool;
use crate::transport::{HttpTransport, StdioTransport};
use crate::types::{RunContext, ToolDescriptor, ToolResult};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Aggregator over stdio and HTTP tool-server transports.
#[derive(Default)]
pub struct ExternalToolClient {
    stdio: HashMap<String, Arc<StdioTransport>>,
    http: HashMap<String, Arc<HttpTransport>>,
}

impl ExternalToolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every configured server. An individual connection failure is
    /// logged and skipped; it does not abort the others.
    pub async fn initialize(&mut self, configs: &[McpServerConfig]) {
        for config in configs {
            match config {
                McpServerConfig::Stdio {
                    name,
                    command,
                    args,
                    env,
                } => match StdioTransport::connect(name, command, args, env).await {
                    Ok(transport) => {
                        self.stdio.insert(name.clone(), transport);
                    }
                    Err(e) => {
                        log::error!("Failed to connect stdio server '{}': {}", name, e);
                    }
                },
                McpServerConfig::Http { name, url, headers } => {
                    match HttpTransport::new(name, url, headers.clone()) {
                        Ok(transport) => {
                            self.http.insert(name.clone(), Arc::new(transport));
                        }
                        Err(e) => {
                            log::error!("Failed to set up http server '{}': {}", name, e);
                        }
                    }
                }
            }
        }
        log::info!(
            "External tool client ready: {} stdio, {} http server(s)",
            self.stdio.len(),
            self.http.len()
        );
    }

    /// Query every transport for its tools and wrap each as an invocable.
    ///
    /// A server whose listing fails is logged and skipped.
    pub async fn discover(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        for (server, transport) in &self.stdio {
            match transport.list_tools().await {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        tools.push(Arc::new(ExternalTool::new(
                            server,
                            descriptor,
                            TransportRef::Stdio(Arc::downgrade(transport)),
                        )));
                    }
                }
                Err(e) => log::error!("Tool discovery failed for '{}': {}", server, e),
            }
        }

        for (server, transport) in &self.http {
            match transport.list_tools().await {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        tools.push(Arc::new(ExternalTool::new(
                            server,
                            descriptor,
                            TransportRef::Http(Arc::downgrade(transport)),
                        )));
                    }
                }
                Err(e) => log::error!("Tool discovery failed for '{}': {}", server, e),
            }
        }

        log::info!("Discovered {} external tool(s)", tools.len());
        tools
    }

    /// Route a call to the named server's transport.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolResult> {
        if let Some(transport) = self.stdio.get(server) {
            return transport.call_tool(tool, arguments).await;
        }
        if let Some(transport) = self.http.get(server) {
            return transport.call_tool(tool, arguments).await;
        }
        Err(Error::not_found(format!("tool server '{}'", server)))
    }

    /// Close every transport and clear internal state. Idempotent.
    pub async fn shutdown(&mut self) {
        for (_, transport) in self.stdio.drain() {
            transport.close().await;
        }
        self.http.clear();
    }
}

/// Which transport a wrapper delegates to. Weak by design: the client owns
/// the transports, and a wrapper outliving the client must fail, not keep a
/// dead child process alive.
enum TransportRef {
    Stdio(Weak<StdioTransport>),
    Http(Weak<HttpTransport>),
}

/// Registry invocable wrapping one discovered external tool.
struct ExternalTool {
    exposed_name: String,
    remote_name: String,
    server: String,
    description: String,
    parameters: Value,
    transport: TransportRef,
}

impl ExternalTool {
    fn new(server: &str, descriptor: ToolDescriptor, transport: TransportRef) -> Self {
        let description = descriptor
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Tool {} from {}", descriptor.name, server));

        Self {
            exposed_name: format!("mcp_{}_{}", server, descriptor.name),
            remote_name: descriptor.name,
            server: server.to_string(),
            description,
            parameters: if descriptor.parameters.is_null() {
                serde_json::json!({"type": "object", "properties": {}})
            } else {
                descriptor.parameters
            },
            transport,
        }
    }
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.exposed_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value, _ctx: &RunContext) -> Result<ToolResult> {
        match &self.transport {
            TransportRef::Stdio(weak) => match weak.upgrade() {
                Some(transport) => transport.call_tool(&self.remote_name, arguments).await,
                None => Err(Error::transport(format!(
                    "server '{}' has been shut down",
                    self.server
                ))),
            },
            TransportRef::Http(weak) => match weak.upgrade() {
                Some(transport) => transport.call_tool(&self.remote_name, arguments).await,
                None => Err(Error::transport(format!(
                    "server '{}' has been shut down",
                    self.server
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, description: Option<&str>) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.map(str::to_string),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn test_exposed_name_and_description_fallback() {
        let tool = ExternalTool::new(
            "files",
            descriptor("read", None),
            TransportRef::Stdio(Weak::new()),
        );
        assert_eq!(tool.name(), "mcp_files_read");
        assert_eq!(tool.description(), "Tool read from files");
    }

    #[test]
    fn test_description_preserved_when_present() {
        let tool = ExternalTool::new(
            "files",
            descriptor("read", Some("Read a file")),
            TransportRef::Stdio(Weak::new()),
        );
        assert_eq!(tool.description(), "Read a file");
    }

    #[test]
    fn test_null_parameters_become_empty_schema() {
        let tool = ExternalTool::new(
            "files",
            ToolDescriptor {
                name: "read".to_string(),
                description: None,
                parameters: Value::Null,
            },
            TransportRef::Http(Weak::new()),
        );
        assert_eq!(tool.parameters()["type"], "object");
    }

    #[tokio::test]
    async fn test_dead_transport_fails_cleanly() {
        let tool = ExternalTool::new(
            "files",
            descriptor("read", None),
            TransportRef::Stdio(Weak::new()),
        );
        let ctx = RunContext::new(None);
        let err = tool.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("shut down"));
    }

    #[tokio::test]
    async fn test_call_tool_unknown_server() {
        let client = ExternalToolClient::new();
        let err = client.call_tool("ghost", "x", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use crate::config::McpServerConfig;
        use std::collections::BTreeMap;

        /// Scripted server: answers tools/list with one tool, then one call.
        const SCRIPT: &str = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"shout","description":"Shout"}]}}\n'
read line
printf '{"jsonrpc":"2.0","id":2,"result":{"content":"LOUD"}}\n'
sleep 5
"#;

        fn stdio_config(name: &str, script: &str) -> McpServerConfig {
            McpServerConfig::Stdio {
                name: name.to_string(),
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: BTreeMap::new(),
            }
        }

        #[tokio::test]
        async fn test_initialize_discover_call_shutdown() {
            let mut client = ExternalToolClient::new();
            client.initialize(&[stdio_config("toolbox", SCRIPT)]).await;

            let tools = client.discover().await;
            assert_eq!(tools.len(), 1);
            assert_eq!(tools[0].name(), "mcp_toolbox_shout");

            let ctx = RunContext::new(None);
            let result = tools[0].execute(json!({"text": "hi"}), &ctx).await.unwrap();
            assert_eq!(result, ToolResult::success("LOUD"));

            client.shutdown().await;
            // The wrapper's weak reference is now dead.
            let err = tools[0].execute(json!({}), &ctx).await.unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
        }

        #[tokio::test]
        async fn test_initialize_skips_failing_server() {
            let broken = McpServerConfig::Stdio {
                name: "broken".to_string(),
                command: "/nonexistent/definitely-not-a-binary".to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
            };

            let mut client = ExternalToolClient::new();
            client
                .initialize(&[broken, stdio_config("healthy", SCRIPT)])
                .await;

            assert!(client.stdio.contains_key("healthy"));
            assert!(!client.stdio.contains_key("broken"));
            client.shutdown().await;
        }
    }
}
