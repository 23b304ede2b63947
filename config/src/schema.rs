use serde_json::{Value, json};

use crate::error::ConfigError;

/// Shape every config source (global file, project file, environment
/// overlay, CLI overlay) is validated against before merge (§6 "Every
/// source is validated against the same schema before merge"). All
/// properties are optional since any single source may set only a
/// fragment of the document.
pub fn document_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "ollama": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "url": {"type": "string"},
                    "model": {"type": "string"},
                    "timeout_ms": {"type": "integer", "minimum": 1},
                    "retries": {"type": "integer", "minimum": 0},
                    "temperature": {"type": ["number", "null"]},
                    "stream": {"type": "boolean"}
                }
            },
            "log": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "level": {"type": "string"},
                    "console": {"type": "boolean"},
                    "file": {"type": ["string", "null"]}
                }
            },
            "working_directory": {"type": "string"},
            "security": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "allow_outside_workspace": {"type": "boolean"},
                    "allow_arbitrary_commands": {"type": "boolean"}
                }
            },
            "preset": {"type": ["string", "null"]}
        }
    })
}

/// Validate `value` against [`document_schema`], tagging failures with
/// `source_name` for diagnostics (e.g. the config file path, `"environment"`,
/// `"cli"`).
pub fn validate(value: &Value, source_name: &str) -> Result<(), ConfigError> {
    let schema = document_schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::SchemaViolation {
            source_name: source_name.to_string(),
            details: errors.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_valid() {
        validate(&json!({}), "test").unwrap();
    }

    #[test]
    fn partial_document_is_valid() {
        validate(&json!({"ollama": {"model": "llama3"}}), "test").unwrap();
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = validate(&json!({"bogus": true}), "test").unwrap_err();
        assert!(matches!(err, ConfigError::SchemaViolation { .. }));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = validate(&json!({"ollama": {"retries": "two"}}), "test").unwrap_err();
        assert!(matches!(err, ConfigError::SchemaViolation { .. }));
    }
}
