//! Request handlers: thin adapters from the client protocol to the core.
//!
//! `query` drives the agentic loop. `search` and `fetch` are deliberately
//! separate from the loop: search prompts the model directly and fabricates
//! result entries whose ids index an in-memory document cache, which is
//! exactly what `fetch` reads back. The cache lives as long as the process.
//!
//! Handlers never propagate failures to the protocol layer as panics; every
//! error becomes readable text so the client always receives a well-formed
//! response.

use crate::agent::AgentLoop;
use crate::llm::{LanguageModel, QueryOptions};
use crate::session::SessionStore;
use crate::tools::ToolRegistry;
use crate::types::{CancelFlag, Part, RunContext};
use crate::{Error, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Most synthetic results returned per search.
const MAX_SEARCH_RESULTS: usize = 3;

/// Lines shorter than this are not promoted to search results.
const MIN_RESULT_LINE_LEN: usize = 10;

/// Title length cap for synthetic results.
const MAX_TITLE_LEN: usize = 100;

/// The three handlers plus their shared state.
pub struct Handlers {
    llm: Arc<dyn LanguageModel>,
    agent: AgentLoop,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    enable_conversations: bool,
    model_name: String,
    documents: Mutex<HashMap<String, Value>>,
}

impl Handlers {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        agent: AgentLoop,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        enable_conversations: bool,
        model_name: String,
    ) -> Self {
        Self {
            llm,
            agent,
            registry,
            sessions,
            enable_conversations,
            model_name,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// `query`: run the agentic loop to a final answer.
    pub async fn handle_query(&self, params: &Value, cancel: CancelFlag) -> Result<String> {
        let prompt = required_str(params, "prompt")?;

        let parts: Vec<Part> = match params.get("parts") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::invalid_input(format!("'parts' is malformed: {}", e)))?,
            None => Vec::new(),
        };

        let session_id = if self.enable_conversations {
            match params.get("sessionId").and_then(Value::as_str) {
                Some(id) => {
                    // Adopt the client's id so the conversation persists
                    // across requests.
                    self.sessions.ensure(id);
                    Some(id.to_string())
                }
                None => Some(self.sessions.create()),
            }
        } else {
            None
        };

        let ctx = RunContext::new(session_id.clone()).with_cancel(cancel);
        let session = session_id
            .as_deref()
            .map(|id| (self.sessions.as_ref(), id));

        self.agent
            .run(&self.registry, session, prompt, &parts, &ctx)
            .await
    }

    /// `search`: prompt the model and synthesize result entries backed by
    /// the document cache.
    pub async fn handle_search(&self, params: &Value) -> Result<String> {
        let query = required_str(params, "query")?;

        let prompt = format!(
            "Search and provide information about: {}. Provide a comprehensive \
answer covering the key facts, recent developments, and relevant details.",
            query
        );
        let response = self
            .llm
            .query(&prompt, &QueryOptions::default(), &[])
            .await?;

        let millis = epoch_millis();
        let slug = slugify(query);
        let mut results = Vec::new();

        for (i, line) in response
            .lines()
            .map(str::trim)
            .filter(|line| line.len() > MIN_RESULT_LINE_LEN)
            .take(MAX_SEARCH_RESULTS)
            .enumerate()
        {
            let id = format!("doc-{}-{}", millis, i);
            let title: String = line.chars().take(MAX_TITLE_LEN).collect();
            let url = format!("https://gemini-search/{}/{}", slug, i);

            let document = json!({
                "id": id,
                "title": title,
                "text": response,
                "url": url,
                "metadata": {
                    "query": query,
                    "timestamp": millis,
                    "model": self.model_name,
                }
            });

            self.documents
                .lock()
                .expect("document cache lock poisoned")
                .insert(id.clone(), document);

            results.push(json!({"id": id, "title": title, "url": url}));
        }

        log::info!("search '{}' produced {} result(s)", query, results.len());
        Ok(json!({"results": results}).to_string())
    }

    /// `fetch`: return a cached document by id.
    pub async fn handle_fetch(&self, params: &Value) -> Result<String> {
        let id = required_str(params, "id")?;

        let document = self
            .documents
            .lock()
            .expect("document cache lock poisoned")
            .get(id)
            .cloned();

        match document {
            Some(document) => Ok(document.to_string()),
            None => Err(Error::not_found(format!("document '{}'", id))),
        }
    }

    /// `tools/list`: the discovery manifest for the client protocol.
    pub fn tools_manifest(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "query",
                    "description": "Ask the model a question; it may call tools while reasoning.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "prompt": {"type": "string", "description": "The question or instruction"},
                            "sessionId": {"type": "string", "description": "Conversation session to continue"},
                            "parts": {"type": "array", "description": "Optional multimodal parts"}
                        },
                        "required": ["prompt"]
                    }
                },
                {
                    "name": "search",
                    "description": "Search for information and return result entries with document ids.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string", "description": "What to search for"}
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "fetch",
                    "description": "Fetch the full document behind a search result id.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "description": "Document id from a search result"}
                        },
                        "required": ["id"]
                    }
                }
            ]
        })
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_input(format!("'{}' is required", key)))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reduce a query to a URL-safe slug.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct CannedModel {
        responses: StdMutex<Vec<String>>,
    }

    impl CannedModel {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            })
        }
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

    fn handlers_with(model: Arc<CannedModel>, enable_conversations: bool) -> Handlers {
        let agent = AgentLoop::new(model.clone(), 5, false);
        Handlers::new(
            model,
            agent,
            Arc::new(ToolRegistry::new(None)),
            Arc::new(SessionStore::new(Duration::from_secs(3600), 10)),
            enable_conversations,
            "gemini-1.5-flash-002".to_string(),
        )
    }

    #[tokio::test]
    async fn test_query_requires_prompt() {
        let handlers = handlers_with(CannedModel::new(&[]), false);
        let err = handlers
            .handle_query(&json!({}), CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_query_plain_answer() {
        let handlers = handlers_with(CannedModel::new(&["42"]), false);
        let answer = handlers
            .handle_query(&json!({"prompt": "meaning of life"}), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(answer, "42");
    }

    #[tokio::test]
    async fn test_search_then_fetch_round_trip() {
        let response = "Rust is a systems programming language.\n\
short\n\
It emphasizes memory safety without garbage collection.\n\
Its package manager is called Cargo and is widely liked.\n\
A fourth line that should not become a result.";
        let handlers = handlers_with(CannedModel::new(&[response]), false);

        let raw = handlers
            .handle_search(&json!({"query": "Rust language"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        let results = parsed["results"].as_array().unwrap();

        // "short" is filtered; three qualifying lines cap the list.
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["title"], "Rust is a systems programming language.");
        assert!(
            results[0]["url"]
                .as_str()
                .unwrap()
                .starts_with("https://gemini-search/rust-language/")
        );

        let id = results[1]["id"].as_str().unwrap();
        assert!(id.starts_with("doc-"));

        let doc_raw = handlers.handle_fetch(&json!({"id": id})).await.unwrap();
        let doc: Value = serde_json::from_str(&doc_raw).unwrap();
        assert_eq!(doc["id"], *id);
        assert_eq!(doc["text"], response);
        assert_eq!(doc["metadata"]["query"], "Rust language");
        assert_eq!(doc["metadata"]["model"], "gemini-1.5-flash-002");
    }

    #[tokio::test]
    async fn test_fetch_unknown_id() {
        let handlers = handlers_with(CannedModel::new(&[]), false);
        let err = handlers
            .handle_fetch(&json!({"id": "doc-0-0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_with_session_keeps_history() {
        let model = CannedModel::new(&["first answer", "second answer"]);
        let handlers = handlers_with(model, true);
        let id = handlers.sessions.create();

        let first = handlers
            .handle_query(
                &json!({"prompt": "first question", "sessionId": id}),
                CancelFlag::new(),
            )
            .await
            .unwrap();
        assert_eq!(first, "first answer");

        handlers
            .handle_query(
                &json!({"prompt": "second question", "sessionId": id}),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        let history = handlers.sessions.history(&id);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "first question");
        assert_eq!(history[1].content, "first answer");
    }

    #[tokio::test]
    async fn test_session_ignored_when_conversations_disabled() {
        let handlers = handlers_with(CannedModel::new(&["answer"]), false);
        let id = handlers.sessions.create();
        handlers
            .handle_query(
                &json!({"prompt": "q", "sessionId": id}),
                CancelFlag::new(),
            )
            .await
            .unwrap();
        assert!(handlers.sessions.history(&id).is_empty());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust language"), "rust-language");
        assert_eq!(slugify("  What's new in Rust 1.85?  "), "what-s-new-in-rust-1-85");
        assert_eq!(slugify("---"), "");
    }

    #[tokio::test]
    async fn test_tools_manifest_lists_three_tools() {
        let handlers = handlers_with(CannedModel::new(&[]), false);
        let manifest = handlers.tools_manifest();
        let tools = manifest["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["query", "search", "fetch"]);
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["prompt"]));
    }
}
