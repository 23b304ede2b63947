use std::path::PathBuf;

/// Failure modes for configuration discovery, parsing, and validation.
/// Kept independent of `qcode_types::ErrorKind` — config is a named
/// external collaborator (§1), not part of the core error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path} as JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config source {source_name} failed schema validation: {details}")]
    SchemaViolation { source_name: String, details: String },

    #[error("invalid config schema: {0}")]
    InvalidSchema(String),

    #[error("resolved config did not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}
