//! Files tool (`internal:files`, §4.3.1) — read/list/search dispatched on an
//! `operation` discriminator.

use std::fs::File;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::GlobBuilder;
use qcode_types::{Error, ErrorKind, ToolResult};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::context::ToolContext;
use crate::registry::{NamespacedTool, ToolExecuteFn};

pub const NAMESPACE: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("internal");
pub const LOCAL_NAME: qcode_types::NonEmptyStaticStr = qcode_types::NonEmptyStaticStr::new("files");

const BINARY_SNIFF_BYTES: usize = 8 * 1024;
const MAX_TEXT_READ_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_MAX_SEARCH_RESULTS: usize = 100;
const SEARCH_CONTEXT_LINES: usize = 3;

#[must_use]
pub fn definition() -> NamespacedTool {
    NamespacedTool {
        namespace: NAMESPACE,
        local_name: LOCAL_NAME,
        definition: qcode_types::ToolDefinition {
            name: LOCAL_NAME.to_string(),
            description: "Read, list, or search files in the workspace".to_string(),
            param_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "enum": ["read", "list", "search"]},
                    "path": {"type": "string"},
                    "startLine": {"type": "integer", "minimum": 1},
                    "endLine": {"type": "integer", "minimum": 1},
                    "encoding": {"type": "string"},
                    "pattern": {"type": "string"},
                    "recursive": {"type": "boolean"},
                    "includeHidden": {"type": "boolean"},
                    "includeMetadata": {"type": "boolean"},
                    "query": {"type": "string"},
                    "useRegex": {"type": "boolean"},
                    "caseSensitive": {"type": "boolean"},
                    "maxResults": {"type": "integer", "minimum": 1},
                    "includeContext": {"type": "boolean"}
                },
                "required": ["operation"],
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
        "read" => read(args, ctx),
        "list" => list(args, ctx),
        "search" => search(args, ctx),
        other => Err(Error::new(
            ErrorKind::ToolValidationError,
            format!("unknown files operation '{other}'"),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(rename = "startLine")]
    start_line: Option<usize>,
    #[serde(rename = "endLine")]
    end_line: Option<usize>,
    encoding: Option<String>,
}

fn read(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: ReadArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad read args: {e}")))?;

    if let (Some(start), Some(end)) = (typed.start_line, typed.end_line)
        && start > end
    {
        return Err(Error::new(
            ErrorKind::ToolValidationError,
            "startLine must be <= endLine",
        ));
    }

    let resolved = ctx.policy.validate_path(
        &typed.path,
        qcode_policy::PathMode::Read,
        &ctx.working_directory,
    )?;

    let explicit_encoding = typed.encoding.is_some_and(|enc| !enc.eq_ignore_ascii_case("utf-8"));
    let meta = std::fs::metadata(&resolved)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("stat failed: {e}")))?;

    if !explicit_encoding && looks_binary(&resolved)? {
        return Err(Error::new(ErrorKind::ToolExecutionError, "binary file"));
    }

    let mut truncated = false;
    let raw = if meta.len() > MAX_TEXT_READ_BYTES {
        truncated = true;
        read_prefix(&resolved, MAX_TEXT_READ_BYTES)?
    } else {
        std::fs::read(&resolved)
            .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("read failed: {e}")))?
    };
    let content = String::from_utf8_lossy(&raw).into_owned();

    let (content, lines_reported) = match (typed.start_line, typed.end_line) {
        (None, None) => {
            let total_lines = count_lines(&content);
            (content, total_lines)
        }
        (start, end) => {
            let lines: Vec<&str> = content.lines().collect();
            let total = lines.len();
            let start = start.unwrap_or(1);
            let end = end.unwrap_or(total);
            if start < 1 || end > total {
                return Err(Error::new(
                    ErrorKind::ToolValidationError,
                    format!("line range {start}-{end} exceeds file length {total}"),
                ));
            }
            let slice = lines[start - 1..end].join("\n");
            let count = end - start + 1;
            (slice, count)
        }
    };

    Ok(json!({
        "content": content,
        "path": resolved.display().to_string(),
        "lines": lines_reported,
        "size": meta.len(),
        "encoding": typed.encoding.unwrap_or_else(|| "utf-8".to_string()),
        "truncated": truncated,
    }))
}

/// Line count as reported to callers: the number of `\n` characters plus
/// one, so a file ending in a newline counts a trailing empty line (e.g.
/// `"Hello World!\n"` is reported as 2 lines, matching how line ranges are
/// addressed elsewhere in this tool).
fn count_lines(content: &str) -> usize {
    content.matches('\n').count() + 1
}

fn looks_binary(path: &Path) -> Result<bool, Error> {
    let mut file = File::open(path)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("open failed: {e}")))?;
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    let n = file
        .read(&mut buf)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("read failed: {e}")))?;
    let sample = &buf[..n];
    if sample.contains(&0) {
        return Ok(true);
    }
    if sample.is_empty() {
        return Ok(false);
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x09 || (0x0e..0x20).contains(&b) || b == 0x7f)
        .count();
    let control_or_invalid = control + count_invalid_utf8_bytes(sample);
    #[allow(clippy::cast_precision_loss)]
    let ratio = control_or_invalid as f64 / sample.len() as f64;
    Ok(ratio > 0.05)
}

/// Count bytes that are not part of a valid UTF-8 sequence, per §4.3.1's
/// "ratio of non-UTF-8-valid/control bytes exceeds 5%".
fn count_invalid_utf8_bytes(sample: &[u8]) -> usize {
    let mut count = 0;
    let mut rest = sample;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => break,
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                let error_len = e.error_len().unwrap_or(rest.len() - valid_up_to);
                count += error_len;
                rest = &rest[valid_up_to + error_len..];
            }
        }
    }
    count
}

fn read_prefix(path: &Path, limit: u64) -> Result<Vec<u8>, Error> {
    let mut file = File::open(path)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("open failed: {e}")))?;
    let mut buf = vec![0u8; usize::try_from(limit).unwrap_or(usize::MAX)];
    let n = file
        .read(&mut buf)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("read failed: {e}")))?;
    buf.truncate(n);
    Ok(buf)
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_dot")]
    path: String,
    pattern: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(rename = "includeHidden", default)]
    include_hidden: bool,
    #[serde(rename = "includeMetadata", default)]
    include_metadata: bool,
}

fn default_dot() -> String {
    ".".to_string()
}

fn list(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: ListArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad list args: {e}")))?;

    let root = ctx
        .policy
        .validate_path(&typed.path, qcode_policy::PathMode::Dir, &ctx.working_directory)?;

    let matcher = typed
        .pattern
        .as_ref()
        .map(|p| {
            GlobBuilder::new(p)
                .literal_separator(true)
                .build()
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad pattern: {e}")))
        })
        .transpose()?;

    let mut files = Vec::new();
    walk(&root, &root, typed.recursive, typed.include_hidden, ctx, &mut |entry_path, meta| {
        let rel = entry_path.strip_prefix(&root).unwrap_or(entry_path);
        if let Some(m) = &matcher
            && !m.is_match(rel)
        {
            return;
        }
        let mut entry = json!({
            "name": entry_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            "relativePath": rel.display().to_string(),
            "size": meta.len(),
            "isDirectory": meta.is_dir(),
        });
        if typed.include_metadata
            && let Ok(modified) = meta.modified()
            && let Ok(since) = modified.duration_since(UNIX_EPOCH)
        {
            entry["modified"] = json!(since.as_millis());
        }
        files.push(entry);
    })?;

    Ok(json!({
        "files": files,
        "path": root.display().to_string(),
        "count": files.len(),
        "pattern": typed.pattern,
    }))
}

fn walk(
    dir: &Path,
    root: &Path,
    recursive: bool,
    include_hidden: bool,
    ctx: &ToolContext,
    visit: &mut impl FnMut(&Path, &std::fs::Metadata),
) -> Result<(), Error> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("list failed: {e}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::new(ErrorKind::ToolExecutionError, format!("list failed: {e}")))?;
        let path = entry.path();
        if ctx.policy.is_forbidden_path(&path).is_some() {
            continue;
        }
        let is_hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if is_hidden && !include_hidden {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        visit(&path, &meta);
        if meta.is_dir() && recursive {
            walk(&path, root, recursive, include_hidden, ctx, visit)?;
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    path: Option<String>,
    pattern: Option<String>,
    #[serde(rename = "useRegex", default)]
    use_regex: bool,
    #[serde(rename = "caseSensitive", default)]
    case_sensitive: bool,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
    #[serde(rename = "includeContext", default = "default_true")]
    include_context: bool,
}

fn default_true() -> bool {
    true
}

fn search(args: &Value, ctx: &ToolContext) -> Result<Value, Error> {
    let typed: SearchArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad search args: {e}")))?;
    if typed.query.trim().is_empty() {
        return Err(Error::new(ErrorKind::ToolValidationError, "query must not be empty"));
    }

    let path_arg = typed.path.clone().unwrap_or_else(default_dot);
    let root = ctx.policy.validate_path(&path_arg, qcode_policy::PathMode::Dir, &ctx.working_directory)?;
    let max_results = typed.max_results.unwrap_or(DEFAULT_MAX_SEARCH_RESULTS);

    let regex = if typed.use_regex {
        let pattern = if typed.case_sensitive {
            typed.query.clone()
        } else {
            format!("(?i){}", typed.query)
        };
        Some(
            Regex::new(&pattern)
                .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("invalid regex: {e}")))?,
        )
    } else {
        None
    };

    let matcher = typed
        .pattern
        .as_ref()
        .map(|p| {
            GlobBuilder::new(p)
                .literal_separator(true)
                .build()
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::new(ErrorKind::ToolValidationError, format!("bad pattern: {e}")))
        })
        .transpose()?;

    let mut matches = Vec::new();
    let mut truncated = false;

    let mut files = Vec::new();
    walk(&root, &root, true, false, ctx, &mut |p, m| {
        if m.is_file() {
            files.push(p.to_path_buf());
        }
    })?;
    files.sort();

    'files: for file in files {
        if let Some(m) = &matcher {
            let rel = file.strip_prefix(&root).unwrap_or(&file);
            if !m.is_match(rel) {
                continue;
            }
        }
        if looks_binary(&file).unwrap_or(true) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&file) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            let found = match &regex {
                Some(re) => re.find(line).map(|m| (m.start(), m.as_str().to_string())),
                None => {
                    let haystack: std::borrow::Cow<'_, str> = if typed.case_sensitive {
                        std::borrow::Cow::Borrowed(*line)
                    } else {
                        std::borrow::Cow::Owned(line.to_lowercase())
                    };
                    let needle = if typed.case_sensitive {
                        typed.query.clone()
                    } else {
                        typed.query.to_lowercase()
                    };
                    haystack
                        .find(&needle)
                        .map(|col| (col, typed.query.clone()))
                }
            };
            let Some((col, matched_text)) = found else { continue };
            if matches.len() >= max_results {
                truncated = true;
                break 'files;
            }
            let mut entry = json!({
                "file": file.display().to_string(),
                "line": idx + 1,
                "column": col,
                "match": matched_text,
            });
            if typed.include_context {
                let before_start = idx.saturating_sub(SEARCH_CONTEXT_LINES);
                let after_end = (idx + 1 + SEARCH_CONTEXT_LINES).min(lines.len());
                entry["context"] = json!({
                    "before": lines[before_start..idx].to_vec(),
                    "after": lines[idx + 1..after_end].to_vec(),
                });
            }
            matches.push(entry);
        }
    }

    let total_matches = matches.len();
    Ok(json!({
        "matches": matches,
        "totalMatches": total_matches,
        "truncated": truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcode_policy::PolicyGate;
    use qcode_types::SecurityPolicy;
    use std::sync::Arc;

    fn test_ctx(dir: &Path) -> ToolContext {
        let policy = PolicyGate::new(SecurityPolicy::workspace_only(dir.to_path_buf())).unwrap();
        ToolContext::new(
            dir.to_path_buf(),
            Arc::new(policy),
            Arc::new(crate::registry::ToolRegistry::new()),
            "test",
        )
    }

    #[test]
    fn read_whole_file_reports_size_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sample.txt"), "Hello World!\n").unwrap();
        let ctx = test_ctx(dir.path());
        let result = read(&json!({"operation": "read", "path": "sample.txt"}), &ctx).unwrap();
        assert_eq!(result["content"], "Hello World!\n");
        assert_eq!(result["size"], 13);
        assert_eq!(result["lines"], 2);
    }

    #[test]
    fn read_line_range_returns_subset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("multi.txt"), "a\nb\nc\nd\ne\nf\n").unwrap();
        let ctx = test_ctx(dir.path());
        let result = read(
            &json!({"operation": "read", "path": "multi.txt", "startLine": 2, "endLine": 4}),
            &ctx,
        )
        .unwrap();
        assert_eq!(result["content"], "b\nc\nd");
        assert_eq!(result["lines"], 3);
    }

    #[test]
    fn read_rejects_out_of_range_end_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("short.txt"), "a\nb\n").unwrap();
        let ctx = test_ctx(dir.path());
        let err = read(
            &json!({"operation": "read", "path": "short.txt", "startLine": 1, "endLine": 10}),
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolValidationError);
    }

    #[test]
    fn read_detects_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3, 0, 0]).unwrap();
        let ctx = test_ctx(dir.path());
        let err = read(&json!({"operation": "read", "path": "bin.dat"}), &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolExecutionError);
    }

    #[test]
    fn read_detects_invalid_utf8_without_control_bytes() {
        // High-bit bytes with no embedded NUL or control characters still
        // count toward the binary ratio if they don't form valid UTF-8.
        let dir = tempfile::tempdir().unwrap();
        // 0x80..=0xBF are UTF-8 continuation bytes; a standalone run of them
        // can never be the start of a valid sequence.
        let bytes: Vec<u8> = (0..256).map(|i| 0x80 + (i % 0x40) as u8).collect();
        std::fs::write(dir.path().join("bin.dat"), &bytes).unwrap();
        let ctx = test_ctx(dir.path());
        let err = read(&json!({"operation": "read", "path": "bin.dat"}), &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolExecutionError);
    }

    #[test]
    fn read_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let err = read(&json!({"operation": "read", "path": "../etc/passwd"}), &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathOutsideWorkspace);
    }

    #[test]
    fn list_skips_hidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        let ctx = test_ctx(dir.path());
        let result = list(&json!({"operation": "list", "path": "."}), &ctx).unwrap();
        let names: Vec<String> = result["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"visible.txt".to_string()));
        assert!(!names.contains(&".hidden".to_string()));
    }

    #[test]
    fn list_recursive_descends_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "x").unwrap();
        let ctx = test_ctx(dir.path());
        let result = list(
            &json!({"operation": "list", "path": "src", "recursive": true}),
            &ctx,
        )
        .unwrap();
        assert_eq!(result["count"], 1);
    }

    #[test]
    fn search_finds_literal_match_with_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo needle\nthree\n").unwrap();
        let ctx = test_ctx(dir.path());
        let result = search(&json!({"operation": "search", "query": "needle"}), &ctx).unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 2);
        assert_eq!(matches[0]["context"]["before"][0], "one");
    }

    #[test]
    fn search_respects_max_results_and_sets_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let content = "needle\n".repeat(5);
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let ctx = test_ctx(dir.path());
        let result = search(
            &json!({"operation": "search", "query": "needle", "maxResults": 2}),
            &ctx,
        )
        .unwrap();
        assert_eq!(result["matches"].as_array().unwrap().len(), 2);
        assert_eq!(result["truncated"], true);
        assert_eq!(result["totalMatches"], 2);
    }

    #[test]
    fn search_with_bad_regex_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = test_ctx(dir.path());
        let err = search(
            &json!({"operation": "search", "query": "(unclosed", "useRegex": true}),
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolValidationError);
    }
}
