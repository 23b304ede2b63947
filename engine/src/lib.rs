//! Orchestration Loop (§4.5) — the heart of the system. Converts a user
//! query into a bounded sequence of LLM↔tool turns and composes a final
//! answer.
//!
//! State machine (§4.5): `Idle → Validating → Conversing ↔ Dispatching →
//! Finalizing → Done`. This is modeled as straight-line control flow with
//! `tracing` spans at each transition rather than an explicit state enum —
//! there is exactly one query in flight per call to [`Orchestrator::process_query`]
//! and no external event can interrupt it except the query timeout, so a
//! reified state machine would buy nothing a sequence of `match`es and
//! early returns don't already give.
//!
//! The orchestrator never panics and never propagates an error out of
//! `process_query`: every exit path is a fully-formed [`EngineResponse`]
//! (§4.6).

mod parsing;
mod termination;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use qcode_llm::LlmClient;
use qcode_policy::PolicyGate;
use qcode_tools::{ToolContext, ToolRegistry};
use qcode_types::{EngineResponse, Error, ErrorKind, Message, NonEmptyString, ToolResult};

const MAX_QUERY_CHARS: usize = 10_000;
const DEFAULT_MAX_TOOL_CALLS_PER_QUERY: usize = 10;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunable bounds for one orchestrator instance (§4.5 "Main loop").
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Hard cap on tool-phase chat turns. Total chat turns for a query
    /// never exceed this plus the one final-answer turn (§8 "Loop
    /// boundedness").
    pub max_tool_calls_per_query: usize,
    /// Overall wall-clock budget for one `process_query` call.
    pub query_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_query: DEFAULT_MAX_TOOL_CALLS_PER_QUERY,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// The agentic controller (§4.5). Holds no per-query state: the registry,
/// policy, and transport are read-mostly collaborators shared across
/// concurrent queries (§5).
pub struct Orchestrator {
    llm: Arc<LlmClient>,
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicyGate>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(llm: Arc<LlmClient>, registry: Arc<ToolRegistry>, policy: Arc<PolicyGate>, config: OrchestratorConfig) -> Self {
        Self {
            llm,
            registry,
            policy,
            config,
        }
    }

    /// §4.5 end to end: validate, converse, dispatch, finalize. Always
    /// returns; never panics; `complete = false` signals partial/failed
    /// processing (§4.6, §7).
    pub async fn process_query(&self, query: &str, working_directory: PathBuf) -> EngineResponse {
        let start = Instant::now();

        if let Err(e) = validate_query(query) {
            return failure_response(start, Vec::new(), Vec::new(), vec![e]);
        }

        let ctx = ToolContext::new(working_directory, Arc::clone(&self.policy), Arc::clone(&self.registry), query);
        let deadline = start + self.config.query_timeout;

        let mut messages = vec![system_message(&self.registry), Message::user(query)];
        let mut tools_executed: Vec<String> = Vec::new();
        let mut tool_results: Vec<ToolResult> = Vec::new();
        let mut errors: Vec<Error> = Vec::new();
        let mut iterations_completed = 0usize;
        // Set only when the tool phase exits on a genuine budget/transport
        // failure rather than the normal "no more calls" or termination-
        // heuristic paths (§4.6: OrchestrationBudgetExceeded/LlmTransportError
        // are the only causes of `complete = false`).
        let mut budget_exhausted = false;

        tracing::debug!(query_len = query.len(), "orchestration loop: validating -> conversing");

        let tool_definitions = self.registry.list_for_llm(None);

        let final_text = 'tool_phase: loop {
            if iterations_completed >= self.config.max_tool_calls_per_query {
                tracing::info!(iterations_completed, "orchestration loop: tool-call budget exhausted");
                errors.push(budget_error("maximum tool-call iterations reached"));
                budget_exhausted = true;
                break 'tool_phase None;
            }

            let Some(remaining) = remaining_time(deadline) else {
                tracing::warn!("orchestration loop: query timeout before next chat turn");
                errors.push(budget_error("query timeout exceeded"));
                budget_exhausted = true;
                break 'tool_phase None;
            };

            let chat_result = tokio::time::timeout(remaining, self.llm.chat(&messages, &tool_definitions)).await;
            let response = match chat_result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e.message, "orchestration loop: llm transport error");
                    errors.push(e);
                    budget_exhausted = true;
                    break 'tool_phase None;
                }
                Err(_elapsed) => {
                    tracing::warn!("orchestration loop: llm chat call exceeded query timeout");
                    errors.push(budget_error("query timeout exceeded during chat call"));
                    budget_exhausted = true;
                    break 'tool_phase None;
                }
            };

            let calls = parsing::extract(&response.content, &response.tool_calls);
            if calls.is_empty() {
                tracing::debug!("orchestration loop: no tool calls parsed, treating content as final answer");
                break 'tool_phase Some(response.content);
            }

            messages.push(Message::assistant(response.content.clone()));

            let had_success_before_iteration = tool_results.iter().any(|r| r.success);
            let mut iteration_results: Vec<ToolResult> = Vec::with_capacity(calls.len());

            for call in &calls {
                let Some(remaining) = remaining_time(deadline) else {
                    tracing::warn!("orchestration loop: query timeout mid-dispatch");
                    errors.push(budget_error("query timeout exceeded"));
                    budget_exhausted = true;
                    break 'tool_phase None;
                };

                let dispatch = tokio::time::timeout(remaining, self.registry.dispatch(&call.tool_name, call.arguments.clone(), ctx.clone())).await;
                let result = match dispatch {
                    Ok(result) => result,
                    Err(_elapsed) => ToolResult::err(String::new(), call.tool_name.clone(), 0, "tool execution exceeded query timeout"),
                };

                tracing::debug!(
                    tool = %call.tool_name,
                    success = result.success,
                    duration_ms = result.duration_ms,
                    "orchestration loop: dispatching"
                );

                messages.push(Message::user(result.format_for_conversation()));
                tools_executed.push(call.tool_name.clone());
                iteration_results.push(result.clone());
                tool_results.push(result);
            }

            iterations_completed += 1;

            if let Some(reason) = termination::evaluate(&tool_results, &iteration_results, had_success_before_iteration, iterations_completed) {
                tracing::info!(?reason, iterations_completed, "orchestration loop: termination heuristic fired");
                break 'tool_phase None;
            }
        };

        let text = match final_text {
            Some(text) => text,
            None => self.finalize(&mut messages, deadline, &mut errors, &mut budget_exhausted).await,
        };

        EngineResponse {
            text,
            tools_executed,
            tool_results,
            processing_time_ms: elapsed_ms(start),
            complete: !budget_exhausted,
            errors,
        }
    }

    /// §4.5 "Final answer phase": ask the model to answer directly from
    /// the accumulated tool results, with no tools offered.
    async fn finalize(&self, messages: &mut Vec<Message>, deadline: Instant, errors: &mut Vec<Error>, budget_exhausted: &mut bool) -> String {
        messages.push(Message::user(
            "Based on the tool results above, answer the original question directly; do not call more tools.",
        ));

        let Some(remaining) = remaining_time(deadline) else {
            errors.push(budget_error("query timeout exceeded before final answer"));
            *budget_exhausted = true;
            return fallback_text(errors);
        };

        match tokio::time::timeout(remaining, self.llm.chat(messages, &[])).await {
            Ok(Ok(response)) if !response.content.trim().is_empty() => response.content,
            Ok(Ok(_empty)) => fallback_text(errors),
            Ok(Err(e)) => {
                let message = e.message.clone();
                errors.push(e);
                *budget_exhausted = true;
                format!("Unable to produce a final answer: {message}")
            }
            Err(_elapsed) => {
                errors.push(budget_error("query timeout exceeded during final answer"));
                *budget_exhausted = true;
                fallback_text(errors)
            }
        }
    }
}

fn fallback_text(errors: &[Error]) -> String {
    if errors.is_empty() {
        "No answer was produced.".to_string()
    } else {
        format!("No answer was produced: {}", errors[errors.len() - 1].message)
    }
}

fn validate_query(query: &str) -> Result<(), Error> {
    if NonEmptyString::new(query).is_err() {
        return Err(Error::new(ErrorKind::InvalidQuery, "query must not be empty"));
    }
    if query.len() > MAX_QUERY_CHARS {
        return Err(Error::new(
            ErrorKind::InvalidQuery,
            format!("query exceeds {MAX_QUERY_CHARS} characters"),
        ));
    }
    Ok(())
}

/// §4.5 "Initial conversation": a system message describing the
/// assistant's role and enumerating available tools by fully-qualified
/// name with one-line descriptions.
fn system_message(registry: &ToolRegistry) -> Message {
    let mut text = String::from(
        "You are qcode, a locally-hosted coding assistant. You have access to sandboxed tools \
         for reading, searching, and editing files in the current workspace, and for running \
         approved shell commands. Use the available tools to gather whatever information you \
         need before answering; call tools using the function-calling interface rather than \
         describing them in prose. When you have enough information, stop calling tools and \
         answer the user's question directly.\n\nAvailable tools:\n",
    );
    for line in registry.describe_for_prompt() {
        text.push_str("- ");
        text.push_str(&line);
        text.push('\n');
    }
    Message::system(text)
}

fn budget_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::OrchestrationBudgetExceeded, message)
}

/// `None` once the deadline has passed.
fn remaining_time(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline { None } else { Some(deadline - now) }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn failure_response(start: Instant, tools_executed: Vec<String>, tool_results: Vec<ToolResult>, errors: Vec<Error>) -> EngineResponse {
    let text = errors
        .first()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "query processing failed".to_string());
    EngineResponse {
        text,
        tools_executed,
        tool_results,
        processing_time_ms: elapsed_ms(start),
        complete: false,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcode_llm::TransportConfig;
    use qcode_types::SecurityPolicy;
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build(base_url: String, workspace: PathBuf, config: OrchestratorConfig) -> Orchestrator {
        let llm = Arc::new(LlmClient::new(TransportConfig {
            base_url,
            model: "test-model".to_string(),
            timeout: StdDuration::from_secs(5),
            retries: 0,
            temperature: None,
        }));
        let registry = Arc::new(qcode_tools::build_default_registry(Arc::clone(&llm)).unwrap());
        let policy = Arc::new(PolicyGate::new(SecurityPolicy::workspace_only(workspace)).unwrap());
        Orchestrator::new(llm, registry, policy, config)
    }

    fn chat_response(body: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(body)
    }

    #[tokio::test]
    async fn empty_query_rejected_without_calling_llm() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let response = orchestrator.process_query("   ", dir.path().to_path_buf()).await;
        assert!(!response.complete);
        assert_eq!(response.errors[0].kind, ErrorKind::InvalidQuery);
        assert!(response.tools_executed.is_empty());
    }

    #[tokio::test]
    async fn oversized_query_rejected() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let huge = "a".repeat(10_001);
        let response = orchestrator.process_query(&huge, dir.path().to_path_buf()).await;
        assert!(!response.complete);
        assert_eq!(response.errors[0].kind, ErrorKind::InvalidQuery);
    }

    /// §8 scenario 1: read an in-workspace file.
    #[tokio::test]
    async fn reads_an_in_workspace_file_end_to_end() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sample.txt"), "Hello World!\n").unwrap();

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "internal:files", "arguments": {"operation": "read", "path": "sample.txt"}}}]
                }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {"role": "assistant", "content": "The file contains: Hello World!", "tool_calls": []}
            })))
            .mount(&server)
            .await;

        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let response = orchestrator.process_query("read sample.txt", dir.path().to_path_buf()).await;

        assert!(response.tools_executed.contains(&"internal:files".to_string()));
        assert_eq!(response.tool_results[0].data.as_ref().unwrap()["content"], "Hello World!\n");
        assert_eq!(response.tool_results[0].data.as_ref().unwrap()["size"], 13);
        assert!(response.complete);
    }

    /// §8 scenario 3: path escape is rejected as a tool failure, not a
    /// panic, and the loop still produces a well-formed response.
    #[tokio::test]
    async fn path_escape_surfaces_as_tool_failure() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "internal:files", "arguments": {"operation": "read", "path": "../etc/passwd"}}}]
                }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {"role": "assistant", "content": "I could not read that path.", "tool_calls": []}
            })))
            .mount(&server)
            .await;

        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let response = orchestrator
            .process_query("read ../etc/passwd", dir.path().to_path_buf())
            .await;

        assert!(!response.tool_results[0].success);
        let error = response.tool_results[0].error.as_ref().unwrap();
        assert!(error.contains("workspace") || error.contains("outside"), "{error}");
    }

    /// §8 scenario 6: repeated failures stop the loop after the third
    /// consecutive failure via the termination heuristic, not a crash.
    #[tokio::test]
    async fn repeated_tool_failures_stop_the_loop() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "internal:files", "arguments": {"operation": "read", "path": "missing.txt"}}}]
                }
            })))
            .mount(&server)
            .await;

        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let response = orchestrator
            .process_query("read missing.txt repeatedly", dir.path().to_path_buf())
            .await;

        assert_eq!(response.tool_results.len(), 3);
        assert!(response.tool_results.iter().all(|r| !r.success));
        assert!(response.complete);
    }

    #[tokio::test]
    async fn no_tool_calls_returns_content_directly_as_final_answer() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_response(json!({
                "model": "test-model",
                "done": true,
                "message": {"role": "assistant", "content": "2 + 2 = 4", "tool_calls": []}
            })))
            .mount(&server)
            .await;

        let orchestrator = build(server.uri(), dir.path().to_path_buf(), OrchestratorConfig::default());
        let response = orchestrator.process_query("what is 2+2?", dir.path().to_path_buf()).await;

        assert_eq!(response.text, "2 + 2 = 4");
        assert!(response.tools_executed.is_empty());
        assert!(response.complete);
    }

    #[test]
    fn invariants_hold_on_every_built_response() {
        let response = failure_response(Instant::now(), Vec::new(), Vec::new(), Vec::new());
        assert!(response.invariants_hold());
    }
}
