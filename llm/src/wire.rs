//! Wire shapes for the Ollama-compatible `/api/tags` and `/api/chat`
//! endpoints (§6 "LLM transport (expected wire shape)"). These are kept
//! separate from `qcode_types::Message`/`FunctionCall` because the wire
//! protocol's JSON shape is an implementation detail of this one
//! transport, not a domain concept the rest of the workspace should know
//! about.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WireFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionDef,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireToolCallFunction {
    pub name: String,
    /// Ollama returns arguments as a JSON object; some servers return a
    /// JSON-encoded string instead. `Value` covers both; the caller
    /// re-parses if it sees `Value::String`.
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireToolCall {
    pub function: WireToolCallFunction,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct WireResponseMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatResponseWire {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub message: WireResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TagsModel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagsModel>,
}
