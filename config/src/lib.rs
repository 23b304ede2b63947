//! Configuration discovery, merge, and validation (§6) — a named external
//! collaborator of the orchestration core: JSON documents discovered
//! walking up from the working directory, merged defaults < global <
//! project (nearest wins) < environment < CLI, every source validated
//! against one schema before merge.

mod discover;
mod env;
mod error;
mod merge;
mod schema;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use discover::{global_config_path, project_config_sources};
pub use error::ConfigError;

/// Resolved, fully-defaulted configuration the CLI and engine consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub log: LogConfig,
    pub working_directory: PathBuf,
    pub security: SecurityOverrides,
    pub preset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub temperature: Option<f64>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub console: bool,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityOverrides {
    pub allow_outside_workspace: bool,
    pub allow_arbitrary_commands: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:11434".to_string(),
            model: "qwen2.5-coder".to_string(),
            timeout_ms: 30_000,
            retries: 2,
            temperature: None,
            stream: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: false,
            file: None,
        }
    }
}

impl Default for SecurityOverrides {
    fn default() -> Self {
        Self {
            allow_outside_workspace: false,
            allow_arbitrary_commands: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            log: LogConfig::default(),
            working_directory: PathBuf::from("."),
            security: SecurityOverrides::default(),
            preset: None,
        }
    }
}

/// Explicit CLI flag values, applied last (highest precedence, §6).
/// `None` means "the flag was not given" — contributes no overlay key.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub model: Option<String>,
    pub verbose: bool,
    pub debug: bool,
    pub no_stream: bool,
    pub timeout_ms: Option<u64>,
}

impl CliOverrides {
    fn to_value(&self) -> Value {
        let mut overlay = json!({});
        let map = overlay.as_object_mut().expect("object literal");
        if let Some(workspace) = &self.workspace {
            map.insert("working_directory".to_string(), json!(workspace.display().to_string()));
        }
        let mut ollama = serde_json::Map::new();
        if let Some(model) = &self.model {
            ollama.insert("model".to_string(), json!(model));
        }
        if let Some(timeout_ms) = self.timeout_ms {
            ollama.insert("timeout_ms".to_string(), json!(timeout_ms));
        }
        if self.no_stream {
            ollama.insert("stream".to_string(), json!(false));
        }
        if !ollama.is_empty() {
            map.insert("ollama".to_string(), Value::Object(ollama));
        }
        if self.debug {
            map.insert("log".to_string(), json!({"level": "debug"}));
        } else if self.verbose {
            map.insert("log".to_string(), json!({"level": "info", "console": true}));
        }
        overlay
    }
}

/// Run the full discovery → validate → merge pipeline and return the
/// resolved configuration. `start_dir` seeds both project-file discovery
/// and the default `working_directory` (§6).
pub fn resolve(start_dir: &Path, cli: &CliOverrides) -> Result<Config, ConfigError> {
    let mut merged = default_document(start_dir);

    if let Some(explicit) = &cli.config_path {
        let value = load_json_file(explicit)?;
        schema::validate(&value, &explicit.display().to_string())?;
        merge::merge_values(&mut merged, &value);
    } else {
        if let Some(global_path) = discover::global_config_path()
            && global_path.is_file()
        {
            let value = load_json_file(&global_path)?;
            schema::validate(&value, &global_path.display().to_string())?;
            merge::merge_values(&mut merged, &value);
        }
        for source in discover::project_config_sources(start_dir) {
            let value = load_json_file(&source)?;
            schema::validate(&value, &source.display().to_string())?;
            merge::merge_values(&mut merged, &value);
        }
    }

    let env_overlay = env::env_overrides();
    schema::validate(&env_overlay, "environment")?;
    merge::merge_values(&mut merged, &env_overlay);

    let cli_overlay = cli.to_value();
    schema::validate(&cli_overlay, "cli")?;
    merge::merge_values(&mut merged, &cli_overlay);

    schema::validate(&merged, "resolved")?;
    let config: Config = serde_json::from_value(merged)?;
    tracing::debug!(?config.ollama.model, ?config.working_directory, "resolved configuration");
    Ok(config)
}

fn default_document(start_dir: &Path) -> Value {
    json!({
        "working_directory": start_dir.display().to_string(),
    })
}

fn load_json_file(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_no_sources_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(config.ollama.model, "qwen2.5-coder");
        assert_eq!(config.working_directory, dir.path());
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("qcode.config.json"),
            r#"{"ollama": {"model": "llama3"}}"#,
        )
        .unwrap();
        let config = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(config.ollama.model, "llama3");
    }

    #[test]
    fn cli_override_beats_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("qcode.config.json"),
            r#"{"ollama": {"model": "llama3"}}"#,
        )
        .unwrap();
        let cli = CliOverrides {
            model: Some("mistral".to_string()),
            ..Default::default()
        };
        let config = resolve(dir.path(), &cli).unwrap();
        assert_eq!(config.ollama.model, "mistral");
    }

    #[test]
    fn invalid_project_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qcode.config.json"), r#"{"bogus": 1}"#).unwrap();
        let err = resolve(dir.path(), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaViolation { .. }));
    }

    #[test]
    fn explicit_config_path_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qcode.config.json"), r#"{"ollama": {"model": "discovered"}}"#).unwrap();
        let explicit = dir.path().join("explicit.json");
        std::fs::write(&explicit, r#"{"ollama": {"model": "explicit"}}"#).unwrap();
        let cli = CliOverrides {
            config_path: Some(explicit),
            ..Default::default()
        };
        let config = resolve(dir.path(), &cli).unwrap();
        assert_eq!(config.ollama.model, "explicit");
    }
}
