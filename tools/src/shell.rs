//! Shell tool (`internal:shell`, §4.3.3) — bounded subprocess execution.
//!
//! Commands never go through a system shell: args are passed directly to
//! `tokio::process::Command`, so no shell-metacharacter interpretation is
//! possible in the child process itself (the Policy Gate additionally
//! rejects metacharacters in the display form before spawn).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use qcode_types::{Error, ErrorKind, ToolResult};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::context::ToolContext;
use crate::process::ChildGuard;
#[cfg(unix)]
use crate::process::set_new_session;
use crate::registry::{NamespacedTool, ToolExecuteFn};

pub const NAMESPACE: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("internal");
pub const LOCAL_NAME: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("shell");

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;
const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// Read-only git subcommands the Shell tool allows beyond the policy's own
/// command glob check (§4.3.3 "`git` receives a secondary... allow-list").
const GIT_READONLY_SUBCOMMANDS: &[&str] =
    &["status", "diff", "log", "show", "branch", "remote", "config"];

#[must_use]
pub fn definition() -> NamespacedTool {
    NamespacedTool {
        namespace: NAMESPACE,
        local_name: LOCAL_NAME,
        definition: qcode_types::ToolDefinition {
            name: LOCAL_NAME.to_string(),
            description: "Run a subprocess command (no shell interpolation)".to_string(),
            param_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "cwd": {"type": "string"},
                    "timeout_ms": {"type": "integer", "minimum": 1},
                    "captureOutput": {"type": "boolean"},
                    "allowStreaming": {"type": "boolean"}
                },
                "required": ["command"],
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
    let start = Instant::now();
    let result = dispatch(&args, &ctx).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(data) => {
            // A non-zero exit is an execution outcome, not a tool crash
            // (§4.3.3) — `success` tracks the exit code, not dispatch.
            let exited_cleanly = data["exitCode"].as_i64() == Some(0);
            ToolResult::outcome(NAMESPACE, LOCAL_NAME, duration_ms, exited_cleanly, data)
        }
        Err(e) => ToolResult::err(NAMESPACE, LOCAL_NAME, duration_ms, e.message),
    }
}

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    timeout_ms: Option<u64>,
    #[serde(rename = "captureOutput", default = "default_true")]
    capture_output: bool,
}

fn default_true() -> bool {
    true
}

async fn dispatch(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let call_start = Instant::now();
    let typed: ShellArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad args: {e}")))?;

    if typed.command.trim().is_empty() {
        return Err(Error::new(ErrorKind::ToolValidationError, "command must not be empty"));
    }

    let working_dir: PathBuf = match &typed.cwd {
        Some(cwd) => ctx
            .policy
            .validate_path(cwd, qcode_policy::PathMode::Dir, &ctx.working_directory)?,
        None => ctx.working_directory.clone(),
    };

    if typed.command == "git" {
        validate_git_subcommand(&typed.args)?;
    }
    ctx.policy.validate_command(&typed.command, &typed.args)?;

    let display = if typed.args.is_empty() {
        typed.command.clone()
    } else {
        format!("{} {}", typed.command, typed.args.join(" "))
    };
    let homoglyph_warning = ctx.policy.detect_mixed_script("command", &display);

    let timeout_ms = typed.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS);

    let mut command = Command::new(&typed.command);
    command
        .args(&typed.args)
        .current_dir(&working_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    #[cfg(unix)]
    set_new_session(&mut command);

    let mut child = command
        .spawn()
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("failed to spawn: {e}")))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut guard = ChildGuard::new(child);

    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if typed.capture_output {
            if let Some(mut pipe) = stdout_pipe.take() {
                let _ = pipe.read_to_end(&mut stdout).await;
            }
            if let Some(mut pipe) = stderr_pipe.take() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
        }
        let status = guard.child_mut().wait().await;
        (status, stdout, stderr)
    };

    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), run).await;

    let (status, stdout, stderr) = match outcome {
        Ok(result) => result,
        Err(_) => {
            // ChildGuard's Drop kills the process group on timeout.
            drop(guard);
            return Err(Error::new(
                ErrorKind::ToolTimeout,
                format!("command timed out after {timeout_ms}ms"),
            ));
        }
    };
    guard.disarm();

    let status = status
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("wait failed: {e}")))?;
    let exit_code = status.code().unwrap_or(-1);

    let warnings: Vec<Value> = homoglyph_warning
        .into_iter()
        .map(|w| json!({"field": w.field_name, "snippet": w.snippet, "scripts": w.scripts_display()}))
        .collect();

    Ok(json!({
        "stdout": truncate_utf8_lossy(&stdout, MAX_CAPTURED_BYTES),
        "stderr": truncate_utf8_lossy(&stderr, MAX_CAPTURED_BYTES),
        "exitCode": exit_code,
        "command": typed.command,
        "args": typed.args,
        "duration_ms": u64::try_from(call_start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "workingDirectory": working_dir.display().to_string(),
        "warnings": warnings,
    }))
}

fn validate_git_subcommand(args: &[String]) -> Result<(), Error> {
    let Some(subcommand) = args.first() else {
        return Err(Error::new(ErrorKind::CommandNotAllowed, "git requires a subcommand"));
    };
    if !GIT_READONLY_SUBCOMMANDS.contains(&subcommand.as_str()) {
        return Err(Error::new(
            ErrorKind::CommandNotAllowed,
            format!("git subcommand '{subcommand}' is not in the read-only allow-list"),
        ));
    }
    Ok(())
}

fn truncate_utf8_lossy(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        String::from_utf8_lossy(&bytes[..limit]).into_owned()
    }
}
