//! Tool Registry (§4.2) — register, namespace, look up, and
//! validate/dispatch tool invocations; record per-tool execution stats.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use qcode_types::{Error, ErrorKind, NonEmptyStaticStr, ToolDefinition, ToolResult};
use serde_json::Value;

use crate::context::ToolContext;

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type ToolExecuteFn = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

/// `(namespace, localName, fullName, definition, execute)` (§3).
#[derive(Clone)]
pub struct NamespacedTool {
    pub namespace: NonEmptyStaticStr,
    pub local_name: NonEmptyStaticStr,
    pub definition: ToolDefinition,
    pub execute: ToolExecuteFn,
}

impl NamespacedTool {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.namespace, self.local_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ToolStatsInner {
    total: u64,
    successes: u64,
    failures: u64,
    total_duration_ms: u64,
}

/// Cumulative execution counters (§4.2 `stats()`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

pub struct ToolRegistry {
    tools: HashMap<String, NamespacedTool>,
    stats: Mutex<HashMap<String, ToolStatsInner>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Insert under `fullName = namespace:localName`. Fails with
    /// `ToolAlreadyExists` unless `allow_override`.
    pub fn register(&mut self, tool: NamespacedTool, allow_override: bool) -> Result<(), Error> {
        let full_name = tool.full_name();
        if !allow_override && self.tools.contains_key(&full_name) {
            return Err(Error::new(
                ErrorKind::ToolAlreadyExists,
                format!("tool '{full_name}' is already registered"),
            ));
        }
        self.tools.insert(full_name, tool);
        Ok(())
    }

    /// Direct lookup by fully-qualified name if `identifier` contains `:`;
    /// otherwise a scan for a unique `localName` match.
    pub fn lookup(&self, identifier: &str) -> Result<&NamespacedTool, Error> {
        if identifier.contains(':') {
            return self.tools.get(identifier).ok_or_else(|| {
                Error::new(ErrorKind::ToolNotFound, format!("no tool registered as '{identifier}'"))
            });
        }

        let matches: Vec<&NamespacedTool> = self
            .tools
            .values()
            .filter(|t| t.local_name == identifier)
            .collect();

        match matches.len() {
            0 => Err(Error::new(
                ErrorKind::ToolNotFound,
                format!("no tool named '{identifier}'"),
            )),
            1 => Ok(matches[0]),
            _ => {
                let namespaces: Vec<&str> = matches.iter().map(|t| t.namespace.as_str()).collect();
                Err(Error::new(
                    ErrorKind::AmbiguousToolName,
                    format!(
                        "'{identifier}' matches tools in multiple namespaces: {}",
                        namespaces.join(", ")
                    ),
                ))
            }
        }
    }

    /// Lookup, schema-validate, dispatch, time, and record stats. Never
    /// panics out: lookup/validation failures and a panicking tool body
    /// all collapse to `ToolResult { success: false, .. }`.
    pub async fn dispatch(&self, identifier: &str, args: Value, ctx: ToolContext) -> ToolResult {
        let start = Instant::now();
        tracing::debug!(tool = identifier, "tool dispatch starting");

        let tool = match self.lookup(identifier) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::warn!(tool = identifier, error = %e.message, "tool dispatch: lookup failed");
                return ToolResult::err("", identifier, elapsed_ms(start), e.message);
            }
        };

        let namespace = tool.namespace.to_string();
        let local_name = tool.local_name.to_string();

        if let Err(e) = validate_args(&tool.definition.param_schema, &args) {
            self.record(&tool.full_name(), false, elapsed_ms(start));
            return ToolResult::err(namespace, local_name, elapsed_ms(start), e.message);
        }

        let execute = Arc::clone(&tool.execute);
        let full_name = tool.full_name();
        let joined = tokio::spawn(async move { (execute)(args, ctx).await }).await;

        let mut result = match joined {
            Ok(result) => result,
            Err(join_error) => ToolResult::err(
                namespace.clone(),
                local_name.clone(),
                elapsed_ms(start),
                format!("tool execution panicked: {join_error}"),
            ),
        };
        result.duration_ms = elapsed_ms(start);
        tracing::debug!(
            tool = %full_name,
            success = result.success,
            duration_ms = result.duration_ms,
            "tool dispatch finished"
        );
        self.record(&full_name, result.success, result.duration_ms);
        result
    }

    fn record(&self, full_name: &str, success: bool, duration_ms: u64) {
        let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = stats.entry(full_name.to_string()).or_default();
        entry.total += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.total_duration_ms += duration_ms;
    }

    /// Cumulative stats across all tools, plus per-tool breakdown.
    #[must_use]
    pub fn stats(&self) -> (ToolStats, HashMap<String, ToolStats>) {
        let stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut total = ToolStats::default();
        let mut per_tool = HashMap::new();
        for (name, inner) in stats.iter() {
            let public = ToolStats {
                total: inner.total,
                successes: inner.successes,
                failures: inner.failures,
                total_duration_ms: inner.total_duration_ms,
            };
            total.total += public.total;
            total.successes += public.successes;
            total.failures += public.failures;
            total.total_duration_ms += public.total_duration_ms;
            per_tool.insert(name.clone(), public);
        }
        (total, per_tool)
    }

    /// Emit `[{type:"function", function: def with name=fullName}]` for
    /// LLM consumption (§4.2 `listForLLM`), optionally filtered to one
    /// namespace.
    #[must_use]
    pub fn list_for_llm(&self, namespace_filter: Option<&str>) -> Vec<qcode_llm::LlmToolDef> {
        self.tools
            .values()
            .filter(|t| namespace_filter.is_none_or(|ns| t.namespace == ns))
            .map(|t| qcode_llm::LlmToolDef {
                name: t.full_name(),
                description: t.definition.description.clone(),
                parameters: t.definition.param_schema.clone(),
            })
            .collect()
    }

    /// One-line `"namespace:name - description"` entries for the system
    /// prompt (§4.5 "Initial conversation").
    #[must_use]
    pub fn describe_for_prompt(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| format!("{} - {}", t.full_name(), t.definition.description))
            .collect();
        lines.sort();
        lines
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn validate_args(schema: &Value, args: &Value) -> Result<(), Error> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        Error::new(ErrorKind::ToolValidationError, format!("invalid tool schema: {e}"))
    })?;
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::ToolValidationError,
            format!("argument validation failed: {}", errors.join("; ")),
        ))
    }
}
