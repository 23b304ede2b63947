use serde_json::Value;

/// `QCODE_*` variable name to dotted config path, in the order spec §6
/// lists them.
const ENV_MAPPING: &[(&str, &[&str])] = &[
    ("QCODE_OLLAMA_URL", &["ollama", "url"]),
    ("QCODE_OLLAMA_MODEL", &["ollama", "model"]),
    ("QCODE_OLLAMA_TIMEOUT", &["ollama", "timeout_ms"]),
    ("QCODE_OLLAMA_RETRIES", &["ollama", "retries"]),
    ("QCODE_OLLAMA_TEMPERATURE", &["ollama", "temperature"]),
    ("QCODE_OLLAMA_STREAM", &["ollama", "stream"]),
    ("QCODE_LOG_LEVEL", &["log", "level"]),
    ("QCODE_LOG_CONSOLE", &["log", "console"]),
    ("QCODE_LOG_FILE", &["log", "file"]),
    ("QCODE_WORKING_DIRECTORY", &["working_directory"]),
    (
        "QCODE_SECURITY_ALLOW_OUTSIDE_WORKSPACE",
        &["security", "allow_outside_workspace"],
    ),
    (
        "QCODE_SECURITY_ALLOW_ARBITRARY_COMMANDS",
        &["security", "allow_arbitrary_commands"],
    ),
    ("QCODE_PRESET", &["preset"]),
];

/// Build the environment overlay by reading every mapped `QCODE_*`
/// variable that is actually set (§6). Variables that aren't set
/// contribute no key, so they never clobber a lower-precedence value.
#[must_use]
pub fn env_overrides() -> Value {
    let mut overlay = Value::Object(serde_json::Map::new());
    for (var_name, path) in ENV_MAPPING {
        if let Ok(raw) = std::env::var(var_name) {
            set_path(&mut overlay, path, parse_env_value(&raw));
        }
    }
    overlay
}

/// Parse one environment string: JSON first, then bool, then number,
/// falling back to the raw string (§6 "parsed as JSON first, then
/// bool/number/string fallback").
fn parse_env_value(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(n) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, rest)) = path.split_last() else { return };
    let mut cursor = root;
    for segment in rest {
        let map = cursor
            .as_object_mut()
            .expect("overlay root and intermediate nodes are always objects");
        cursor = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    cursor
        .as_object_mut()
        .expect("overlay root and intermediate nodes are always objects")
        .insert((*last).to_string(), value);
}
