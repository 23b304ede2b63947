//! Tool-call extraction from one LLM turn (§4.5 step 2, §9 "Dynamic JSON at
//! the LLM boundary").
//!
//! Three paths, tried strictly in order, modeled as a tagged decoder rather
//! than a duck-typed walk: the transport's native `tool_calls`, then a JSON
//! body embedded in the assistant's `content`, then a regex scan of plain
//! text for `name(args-json)` occurrences. An unrecognized shape at any
//! stage falls through to the next one; exhausting all three yields an
//! empty vector, never an error — the loop treats that as "no more tools,
//! this is the final answer" (§4.5 step 2).

use qcode_types::FunctionCall;
use regex::Regex;
use serde_json::Value;

/// Run all three paths in order and return the first that yields calls.
#[must_use]
pub fn extract(content: &str, native_tool_calls: &[FunctionCall]) -> Vec<FunctionCall> {
    if !native_tool_calls.is_empty() {
        return native_tool_calls.to_vec();
    }
    let from_body = from_json_body(content);
    if !from_body.is_empty() {
        return from_body;
    }
    from_regex_scan(content)
}

/// Secondary path: `content` parses whole as JSON and matches one of
/// `{function_call:{name,arguments}}`, `{tool_calls:[…]}`, or
/// `{name, arguments}`. `arguments` may itself be a JSON-encoded string
/// needing a second parse.
fn from_json_body(content: &str) -> Vec<FunctionCall> {
    let Ok(value) = serde_json::from_str::<Value>(content.trim()) else {
        return Vec::new();
    };
    extract_from_value(&value)
}

fn extract_from_value(value: &Value) -> Vec<FunctionCall> {
    if let Some(entries) = value.get("tool_calls").and_then(Value::as_array) {
        return entries.iter().filter_map(call_from_entry).collect();
    }
    if let Some(entry) = value.get("function_call") {
        return call_from_entry(entry).into_iter().collect();
    }
    call_from_entry(value).into_iter().collect()
}

fn call_from_entry(entry: &Value) -> Option<FunctionCall> {
    // Native-style wrapping: {"function": {"name": ..., "arguments": ...}}.
    let entry = entry.get("function").unwrap_or(entry);
    let tool_name = entry.get("name").and_then(Value::as_str)?.to_string();
    let raw_arguments = entry.get("arguments").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let arguments = match raw_arguments {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    Some(FunctionCall { tool_name, arguments })
}

/// Tertiary path: regex-scan plain text for `name({...})` occurrences,
/// matching braces by depth (not greedily) so one nested-object argument
/// doesn't truncate the match.
fn from_regex_scan(content: &str) -> Vec<FunctionCall> {
    let Ok(name_re) = Regex::new(r"[A-Za-z_][A-Za-z0-9_:.\-]*\(") else {
        return Vec::new();
    };
    let bytes = content.as_bytes();
    let mut calls = Vec::new();

    for m in name_re.find_iter(content) {
        let tool_name = content[m.start()..m.end() - 1].to_string();
        let mut cursor = m.end();
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() || bytes[cursor] != b'{' {
            continue;
        }

        let start_brace = cursor;
        let mut depth: i32 = 0;
        let mut end_brace = None;
        for (offset, byte) in bytes[start_brace..].iter().enumerate() {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end_brace = Some(start_brace + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        let Some(end_brace) = end_brace else { continue };
        let args_str = &content[start_brace..end_brace];
        if let Ok(arguments) = serde_json::from_str::<Value>(args_str) {
            calls.push(FunctionCall { tool_name, arguments });
        }
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_tool_calls_take_priority() {
        let native = vec![FunctionCall {
            tool_name: "internal:files".to_string(),
            arguments: json!({"operation": "read"}),
        }];
        let result = extract("{\"name\": \"ignored\"}", &native);
        assert_eq!(result, native);
    }

    #[test]
    fn json_body_function_call_shape() {
        let content = r#"{"function_call": {"name": "internal:files", "arguments": {"operation": "list"}}}"#;
        let result = extract(content, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tool_name, "internal:files");
        assert_eq!(result[0].arguments, json!({"operation": "list"}));
    }

    #[test]
    fn json_body_tool_calls_array_shape() {
        let content =
            r#"{"tool_calls": [{"function": {"name": "internal:shell", "arguments": "{\"command\": \"ls\"}"}}]}"#;
        let result = extract(content, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tool_name, "internal:shell");
        assert_eq!(result[0].arguments, json!({"command": "ls"}));
    }

    #[test]
    fn json_body_bare_name_arguments_shape() {
        let content = r#"{"name": "internal:files", "arguments": {"operation": "read", "path": "a.txt"}}"#;
        let result = extract(content, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tool_name, "internal:files");
    }

    #[test]
    fn regex_fallback_scans_plain_text_for_call_shape() {
        let content = "I'll read the file.\ninternal:files({\"operation\": \"read\", \"path\": \"a.txt\"})\nDone.";
        let result = extract(content, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tool_name, "internal:files");
        assert_eq!(result[0].arguments["path"], "a.txt");
    }

    #[test]
    fn regex_fallback_handles_nested_braces() {
        let content = "internal:edit({\"operation\": \"replace\", \"extra\": {\"nested\": true}})";
        let result = extract(content, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].arguments["extra"]["nested"], true);
    }

    #[test]
    fn unrecognized_shape_yields_empty_not_error() {
        let result = extract("I think the answer is 42.", &[]);
        assert!(result.is_empty());
    }

    #[test]
    fn plain_json_object_without_name_yields_empty() {
        let result = extract(r#"{"foo": "bar"}"#, &[]);
        assert!(result.is_empty());
    }
}
