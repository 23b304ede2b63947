//! LLM Transport Adapter (§4.4) — the minimal surface the orchestration
//! core needs: issue a function-calling chat turn and receive either a
//! parsed tool-call list or a final text answer; validate availability;
//! retry with backoff and time out. The adapter does not interpret tool
//! calls; it only passes structured shapes through (§4.4, §9 "Dynamic
//! JSON at LLM boundary").

mod wire;

use std::time::Duration;

use qcode_types::{Error, ErrorKind, FunctionCall, Message, Role};
use wire::{ChatOptions, ChatRequest, ChatResponseWire, TagsResponse, WireFunctionDef, WireMessage, WireTool};

/// Result of one `chat` turn: the assistant's raw text, plus any tool
/// calls parsed from the transport's native `tool_calls` field. An empty
/// `tool_calls` vector does not mean the assistant proposed no tools — it
/// may mean this transport/model only emits them embedded in `content`;
/// the orchestration loop's secondary/tertiary parsing paths handle that.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<FunctionCall>,
}

/// Retry/timeout configuration for one adapter instance.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub retries: u32,
    pub temperature: Option<f32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "qwen2.5-coder".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            temperature: None,
        }
    }
}

/// A tool definition as handed to the LLM: fully-qualified name plus
/// JSON-schema parameters (§4.2 `listForLLM`).
#[derive(Debug, Clone)]
pub struct LlmToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: TransportConfig,
}

impl LlmClient {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// `GET /api/tags`.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        let parsed: TagsResponse = self
            .with_retry(|| async {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| transport_error(format!("GET /api/tags failed: {e}")))?;
                let response = ensure_success(response).await?;
                response
                    .json()
                    .await
                    .map_err(|e| transport_error(format!("invalid /api/tags response: {e}")))
            })
            .await?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether `name` appears in `list_models()`.
    pub async fn model_available(&self, name: &str) -> Result<bool, Error> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == name))
    }

    /// `POST /api/chat`. `tools` empty means "final answer phase"
    /// (§4.5 "Call `LLM.chat(messages, tools=∅)`").
    pub async fn chat(&self, messages: &[Message], tools: &[LlmToolDef]) -> Result<ChatResponse, Error> {
        let wire_messages = messages.iter().map(to_wire_message).collect();
        let wire_tools = tools.iter().map(to_wire_tool).collect();
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: wire_messages,
            tools: wire_tools,
            format: None,
            stream: false,
            options: self.config.temperature.map(|t| ChatOptions { temperature: Some(t) }),
        };

        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let parsed: ChatResponseWire = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| transport_error(format!("POST /api/chat failed: {e}")))?;
                let response = ensure_success(response).await?;
                response
                    .json()
                    .await
                    .map_err(|e| transport_error(format!("invalid /api/chat response: {e}")))
            })
            .await?;

        let tool_calls = parsed
            .message
            .tool_calls
            .into_iter()
            .map(|tc| FunctionCall {
                tool_name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            content: parsed.message.content,
            tool_calls,
        })
    }

    /// Exponential backoff: 1s, 2s, 4s, ... bounded by `config.retries`
    /// additional attempts beyond the first (§4.4).
    async fn with_retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut last_err = None;
        for attempt_index in 0..=self.config.retries {
            match attempt().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(attempt = attempt_index, error = %e.message, "llm transport attempt failed");
                    last_err = Some(e);
                    if attempt_index < self.config.retries {
                        let backoff = Duration::from_secs(1u64 << attempt_index);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| transport_error("llm transport exhausted retries")))
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    WireMessage {
        role,
        content: message.content.clone(),
    }
}

fn to_wire_tool(def: &LlmToolDef) -> WireTool {
    WireTool {
        kind: "function",
        function: WireFunctionDef {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        },
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(transport_error(format!("request failed with status {status}: {body}")))
}

fn transport_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::LlmTransportError, message).retryable(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcode_types::Message;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: String) -> LlmClient {
        LlmClient::new(TransportConfig {
            base_url,
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
            retries: 1,
            temperature: None,
        })
    }

    #[tokio::test]
    async fn list_models_parses_tags_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3"}, {"name": "qwen2.5-coder"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3".to_string(), "qwen2.5-coder".to_string()]);
    }

    #[tokio::test]
    async fn model_available_checks_membership() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        assert!(client.model_available("llama3").await.unwrap());
        assert!(!client.model_available("missing").await.unwrap());
    }

    #[tokio::test]
    async fn chat_parses_native_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "done": true,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "internal:files", "arguments": {"operation": "read", "path": "a.txt"}}}]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let messages = vec![Message::user("read a.txt")];
        let response = client.chat(&messages, &[]).await.unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].tool_name, "internal:files");
    }

    #[tokio::test]
    async fn chat_retries_on_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "done": true,
                "message": {"role": "assistant", "content": "ok", "tool_calls": []}
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let messages = vec![Message::user("hi")];
        let response = client.chat(&messages, &[]).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn chat_exhausts_retries_and_surfaces_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let messages = vec![Message::user("hi")];
        let err = client.chat(&messages, &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LlmTransportError);
    }
}
