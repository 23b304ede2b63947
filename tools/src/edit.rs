//! Edit tool (`internal:edit`, §4.3.2) — atomic line-level file mutations.
//!
//! Every mutation writes to a sibling temporary file, then renames it over
//! the target; on any failure the temp file is unlinked best-effort and the
//! original error propagates, leaving the target byte-identical to its
//! pre-call state.

use std::path::Path;

use qcode_types::{Error, ErrorKind, ToolResult};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::context::ToolContext;
use crate::registry::{NamespacedTool, ToolExecuteFn};

pub const NAMESPACE: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("internal");
pub const LOCAL_NAME: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("edit");

#[must_use]
pub fn definition() -> NamespacedTool {
    NamespacedTool {
        namespace: NAMESPACE,
        local_name: LOCAL_NAME,
        definition: qcode_types::ToolDefinition {
            name: LOCAL_NAME.to_string(),
            description: "Apply a surgical line-level edit to a file".to_string(),
            param_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "enum": ["insert_line", "replace", "replace_lines", "delete_lines", "create_file"]},
                    "path": {"type": "string"},
                    "line": {"type": "integer", "minimum": 1},
                    "content": {"type": "string"},
                    "find": {"type": "string"},
                    "replaceWith": {"type": "string"},
                    "useRegex": {"type": "boolean"},
                    "global": {"type": "boolean"},
                    "startLine": {"type": "integer", "minimum": 1},
                    "endLine": {"type": "integer", "minimum": 1},
                    "createParents": {"type": "boolean"}
                },
                "required": ["operation", "path"],
                "additionalProperties": false
            }),
        },
        execute: execute_fn(),
    }
}

fn execute_fn() -> ToolExecuteFn {
    std::sync::Arc::new(|args, ctx| Box::pin(async move { execute(args, ctx).await }))
}

async fn execute(args: Value, ctx: ToolContext) -> ToolResult {
    let start = std::time::Instant::now();
    let result = dispatch(&args, &ctx).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(data) => ToolResult::ok(NAMESPACE, LOCAL_NAME, duration_ms, data),
        Err(e) => ToolResult::err(NAMESPACE, LOCAL_NAME, duration_ms, e.message),
    }
}

async fn dispatch(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let operation = args
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::new(ErrorKind::ToolValidationError, "missing 'operation'"))?;
    match operation {
        "insert_line" => insert_line(args, ctx),
        "replace" => replace(args, ctx),
        "replace_lines" => replace_lines(args, ctx),
        "delete_lines" => delete_lines(args, ctx),
        "create_file" => create_file(args, ctx),
        other => Err(Error::new(
            ErrorKind::ToolValidationError,
            format!("unknown edit operation '{other}'"),
        )),
    }
}

/// Write `content` to a sibling temp file next to `target`, then rename it
/// into place. Unlinks the temp file best-effort on any failure.
fn atomic_write(target: &Path, content: &str) -> Result<(), Error> {
    let parent = target.parent().ok_or_else(|| {
        Error::new(ErrorKind::ToolExecutionError, "path has no parent directory")
    })?;
    let tmp_name = format!(
        ".{}.qcode-tmp-{}",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("edit"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    let write_result = std::fs::write(&tmp_path, content)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("write failed: {e}")));
    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp_path, target) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::new(ErrorKind::ToolExecutionError, format!("rename failed: {e}")));
    }
    Ok(())
}

fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("read failed: {e}")))?;
    Ok(content.lines().map(str::to_string).collect())
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("{}\n", lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct InsertLineArgs {
    path: String,
    line: usize,
    content: String,
}

fn insert_line(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: InsertLineArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;
    let resolved = ctx.policy.validate_path(&typed.path, qcode_policy::PathMode::Write, &ctx.working_directory)?;

    let mut lines = read_lines(&resolved)?;
    let n = lines.len();
    if typed.line < 1 || typed.line > n + 1 {
        return Err(Error::new(
            ErrorKind::ToolValidationError,
            format!("line {} out of range [1, {}]", typed.line, n + 1),
        ));
    }
    lines.insert(typed.line - 1, typed.content);
    atomic_write(&resolved, &join_lines(&lines))?;

    Ok(json!({"path": resolved.display().to_string(), "line": typed.line}))
}

#[derive(Debug, Deserialize)]
struct ReplaceArgs {
    path: String,
    find: String,
    #[serde(rename = "replaceWith")]
    replace_with: String,
    #[serde(rename = "useRegex", default)]
    use_regex: bool,
    #[serde(default)]
    global: bool,
}

fn replace(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: ReplaceArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;
    let resolved = ctx.policy.validate_path(&typed.path, qcode_policy::PathMode::Write, &ctx.working_directory)?;
    let content = std::fs::read_to_string(&resolved)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("read failed: {e}")))?;

    let (new_content, matches_found) = if typed.use_regex {
        let regex = Regex::new(&typed.find)
            .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("invalid regex: {e}")))?;
        let count = regex.find_iter(&content).count();
        let replaced = if typed.global {
            regex.replace_all(&content, typed.replace_with.as_str()).into_owned()
        } else {
            regex.replace(&content, typed.replace_with.as_str()).into_owned()
        };
        let effective = if typed.global { count } else { count.min(1) };
        (replaced, effective)
    } else {
        let count = content.matches(typed.find.as_str()).count();
        let replaced = if typed.global {
            content.replace(typed.find.as_str(), &typed.replace_with)
        } else {
            content.replacen(typed.find.as_str(), &typed.replace_with, 1)
        };
        let effective = if typed.global { count } else { count.min(1) };
        (replaced, effective)
    };

    if matches_found > 0 {
        atomic_write(&resolved, &new_content)?;
    }

    Ok(json!({"path": resolved.display().to_string(), "matches_found": matches_found}))
}

#[derive(Debug, Deserialize)]
struct LineRangeArgs {
    path: String,
    #[serde(rename = "startLine")]
    start_line: usize,
    #[serde(rename = "endLine")]
    end_line: usize,
    content: Option<String>,
}

fn replace_lines(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: LineRangeArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;
    let resolved = ctx.policy.validate_path(&typed.path, qcode_policy::PathMode::Write, &ctx.working_directory)?;
    let mut lines = read_lines(&resolved)?;
    validate_range(typed.start_line, typed.end_line, lines.len())?;

    let replacement: Vec<String> = match &typed.content {
        Some(c) if !c.is_empty() => c.lines().map(str::to_string).collect(),
        _ => Vec::new(),
    };
    lines.splice(typed.start_line - 1..typed.end_line, replacement);
    atomic_write(&resolved, &join_lines(&lines))?;

    Ok(json!({
        "path": resolved.display().to_string(),
        "startLine": typed.start_line,
        "endLine": typed.end_line,
    }))
}

fn delete_lines(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: LineRangeArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;
    let resolved = ctx.policy.validate_path(&typed.path, qcode_policy::PathMode::Write, &ctx.working_directory)?;
    let mut lines = read_lines(&resolved)?;
    validate_range(typed.start_line, typed.end_line, lines.len())?;

    lines.drain(typed.start_line - 1..typed.end_line);
    atomic_write(&resolved, &join_lines(&lines))?;

    Ok(json!({
        "path": resolved.display().to_string(),
        "deleted": typed.end_line - typed.start_line + 1,
    }))
}

fn validate_range(start: usize, end: usize, n: usize) -> Result<(), Error> {
    if start < 1 || start > end || end > n {
        return Err(Error::new(
            ErrorKind::ToolValidationError,
            format!("line range {start}-{end} invalid for file with {n} lines"),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateFileArgs {
    path: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "createParents", default)]
    create_parents: bool,
}

fn create_file(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: CreateFileArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;

    let resolved = ctx.policy.validate_path(&typed.path, qcode_policy::PathMode::Write, &ctx.working_directory)?;

    if resolved.exists() {
        return Err(Error::new(
            ErrorKind::ToolExecutionError,
            format!("'{}' already exists", resolved.display()),
        ));
    }

    if typed.create_parents
        && let Some(parent) = resolved.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("mkdir failed: {e}")))?;
    }

    atomic_write(&resolved, &typed.content)?;

    Ok(json!({"path": resolved.display().to_string()}))
}
