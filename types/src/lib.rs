//! Core domain types for qcode.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. It is consumed by every other crate in the workspace:
//! `qcode-policy` compiles `SecurityPolicy`'s string patterns into matchers,
//! `qcode-tools` builds `ToolResult`s, `qcode-llm` parses into `Message`/
//! `FunctionCall`, and `qcode-engine` assembles `EngineResponse`.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod confusables;
pub mod proofs;
mod sanitize;
pub mod text;

mod ids;

pub use confusables::{
    HomoglyphWarning, contains_steganographic_chars, detect_mixed_script, is_steganographic_char,
};
pub use ids::RequestId;
pub use proofs::{EmptyStringError, NonEmptyStaticStr, NonEmptyString};
pub use sanitize::sanitize_terminal_text;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Security Policy (§3, §4.1)
// ============================================================================

/// Immutable, per-engine-instance filesystem and command sandbox policy.
///
/// This is plain configuration data: path and command *patterns* as
/// strings. `qcode-policy` compiles `forbidden_path_globs`,
/// `allow_command_globs`, and `deny_command_globs` into matchers once, at
/// construction of its `PolicyGate`, rather than re-parsing them per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Non-empty set of absolute, canonicalized directory paths a query may
    /// observe or mutate.
    pub allowed_roots: Vec<PathBuf>,
    /// Ordered list of glob patterns (e.g. `**/.git/**`, `**/.env*`,
    /// `**/*.key`) that are fatal to match regardless of `allowed_roots`.
    pub forbidden_path_globs: Vec<String>,
    /// Escape hatch disabling the `allowed_roots` containment check.
    #[serde(default)]
    pub allow_outside_roots: bool,
    /// Shell-command glob patterns that must match at least once.
    pub allow_command_globs: Vec<String>,
    /// Shell-command glob patterns that are fatal to match; deny always
    /// wins over allow.
    pub deny_command_globs: Vec<String>,
}

impl SecurityPolicy {
    /// A conservative default: only the given root is reachable, deny no
    /// extra commands beyond the catastrophic blacklist, and allow nothing
    /// by default (callers must opt commands in explicitly).
    #[must_use]
    pub fn workspace_only(root: PathBuf) -> Self {
        Self {
            allowed_roots: vec![root],
            forbidden_path_globs: Vec::new(),
            allow_outside_roots: false,
            allow_command_globs: Vec::new(),
            deny_command_globs: Vec::new(),
        }
    }
}

// ============================================================================
// Tool Contracts (§3, §4.2)
// ============================================================================

/// `(name, description, paramSchema)` — a JSON-schema-shaped declaration of
/// a tool's calling convention, handed to the LLM verbatim (with `name`
/// rewritten to the tool's fully-qualified name) as a function-calling
/// tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object: `{"type": "object", "properties": {...},
    /// "required": [...], "additionalProperties": false}`.
    pub param_schema: Value,
}

/// The outcome of one tool invocation. `success = false` is a normal,
/// fully-formed result — it never represents a crash of the registry or
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tool: String,
    pub namespace: String,
}

impl ToolResult {
    #[must_use]
    pub fn ok(namespace: impl Into<String>, tool: impl Into<String>, duration_ms: u64, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            tool: tool.into(),
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn err(
        namespace: impl Into<String>,
        tool: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
            tool: tool.into(),
            namespace: namespace.into(),
        }
    }

    /// A tool call that ran to completion but produced a non-exceptional
    /// failure outcome (e.g. a subprocess's non-zero exit code) — `data` is
    /// still attached for the caller to inspect, but `success` reflects the
    /// outcome rather than "did the tool dispatch without panicking".
    #[must_use]
    pub fn outcome(
        namespace: impl Into<String>,
        tool: impl Into<String>,
        duration_ms: u64,
        success: bool,
        data: Value,
    ) -> Self {
        Self {
            success,
            data: Some(data),
            error: None,
            duration_ms,
            tool: tool.into(),
            namespace: namespace.into(),
        }
    }

    /// Render for injection into the conversation as a `Tool: <name>\nResult:
    /// <compact formatted data>` message (§3 `Message` contract).
    #[must_use]
    pub fn format_for_conversation(&self) -> String {
        let fq_name = if self.namespace.is_empty() {
            self.tool.clone()
        } else {
            format!("{}:{}", self.namespace, self.tool)
        };
        if self.success {
            let data = self
                .data
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_else(|_| v.to_string()))
                .unwrap_or_else(|| "null".to_string());
            format!("Tool: {fq_name}\nResult: {data}")
        } else {
            let error = self.error.as_deref().unwrap_or("unknown error");
            format!("Tool: {fq_name}\nResult: error: {error}")
        }
    }
}

// ============================================================================
// Conversation (§3)
// ============================================================================

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation turn. Tool-call outputs are injected as `User`
/// messages carrying `ToolResult::format_for_conversation` text (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// `(toolName, arguments)` extracted from an LLM turn, regardless of which
/// of the three parsing paths (native `tool_calls`, JSON-in-content, or
/// regex fallback) produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub tool_name: String,
    pub arguments: Value,
}

// ============================================================================
// Engine Response (§3, §4.5)
// ============================================================================

/// The orchestrator's only exit value — never an exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub text: String,
    pub tools_executed: Vec<String>,
    pub tool_results: Vec<ToolResult>,
    pub processing_time_ms: u64,
    pub complete: bool,
    #[serde(default)]
    pub errors: Vec<Error>,
}

impl EngineResponse {
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        self.tools_executed.len() == self.tool_results.len()
    }
}

// ============================================================================
// Error & Result Model (§3, §4.6)
// ============================================================================

/// Closed set of error kinds. Every `Error` carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidQuery,
    PathOutsideWorkspace,
    ForbiddenPathPattern,
    CommandNotAllowed,
    CommandDenied,
    ToolNotFound,
    AmbiguousToolName,
    ToolAlreadyExists,
    ToolValidationError,
    ToolExecutionError,
    ToolTimeout,
    LlmTransportError,
    OrchestrationBudgetExceeded,
    Unknown,
}

impl ErrorKind {
    /// Whether this class of failure is worth an automatic retry at the
    /// layer that produced it (only the LLM transport adapter retries
    /// today; see §7).
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(self, Self::LlmTransportError)
    }
}

/// A single tagged error type shared across every crate boundary. Tools
/// never throw out of the registry boundary and the orchestrator never
/// throws: all exits are `ToolResult` or `EngineResponse`, and any `Error`
/// that does escape ends up embedded in one of those two.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub retryable: bool,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.default_retryable();
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            retryable,
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
