//! qcode — one-shot CLI entry point (§6).
//!
//! `qcode [options] [query]` runs a single orchestrated query against the
//! workspace and prints the final answer to stdout. `qcode config` prints
//! the fully resolved configuration; `qcode version` prints a version
//! banner. All diagnostic logging goes to a log file, never to stdout —
//! stdout is reserved for the one piece of output each subcommand exists
//! to produce.

mod crash_hardening;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use qcode_config::CliOverrides;
use qcode_engine::{Orchestrator, OrchestratorConfig};
use qcode_llm::{LlmClient, TransportConfig};
use qcode_policy::PolicyGate;
use qcode_types::SecurityPolicy;

#[derive(Parser)]
#[command(name = "qcode", version, about = "A locally-hosted agentic coding assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to an explicit configuration file, bypassing discovery.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Workspace root to operate against (defaults to the current directory).
    #[arg(short = 'w', long = "workspace")]
    workspace: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Debug logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Override the configured LLM model id.
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Disable streaming chat responses.
    #[arg(long = "no-stream")]
    no_stream: bool,

    /// Override the LLM transport timeout, in milliseconds.
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// The natural-language query (one-shot mode; ignored if a subcommand is given).
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the fully resolved configuration and exit.
    Config,
    /// Print the version banner and exit.
    Version,
}

fn main() -> Result<()> {
    crash_hardening::apply().context("failed to apply crash dump hardening")?;

    let cli = Cli::parse();

    let start_dir = resolve_start_dir(&cli)?;
    let cli_overrides = CliOverrides {
        config_path: cli.config.clone(),
        workspace: cli.workspace.clone(),
        model: cli.model.clone(),
        verbose: cli.verbose,
        debug: cli.debug,
        no_stream: cli.no_stream,
        timeout_ms: cli.timeout,
    };
    let config = qcode_config::resolve(&start_dir, &cli_overrides).context("failed to resolve configuration")?;

    init_tracing(&config);

    match cli.command {
        Some(Command::Version) => {
            println!("qcode {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Command::Config) => {
            let rendered = serde_json::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        None => {
            let query = cli.query.join(" ");
            run_one_shot_query(&config, &query)
        }
    }
}

fn resolve_start_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.workspace {
        Some(workspace) => Ok(workspace.clone()),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}

fn run_one_shot_query(config: &qcode_config::Config, query: &str) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(process_query(config, query))
}

async fn process_query(config: &qcode_config::Config, query: &str) -> Result<()> {
    let policy = SecurityPolicy {
        allowed_roots: vec![config.working_directory.clone()],
        forbidden_path_globs: vec![
            "**/.git/**".to_string(),
            "**/.env*".to_string(),
            "**/*.key".to_string(),
            "**/*.pem".to_string(),
        ],
        allow_outside_roots: config.security.allow_outside_workspace,
        allow_command_globs: if config.security.allow_arbitrary_commands {
            vec!["*".to_string()]
        } else {
            vec![
                "git *".to_string(),
                "ls *".to_string(),
                "cat *".to_string(),
                "grep *".to_string(),
                "find *".to_string(),
            ]
        },
        deny_command_globs: vec!["rm *".to_string(), "sudo *".to_string()],
    };
    let policy_gate = Arc::new(PolicyGate::new(policy).context("failed to construct policy gate")?);

    let transport = TransportConfig {
        base_url: config.ollama.url.clone(),
        model: config.ollama.model.clone(),
        timeout: std::time::Duration::from_millis(config.ollama.timeout_ms),
        retries: config.ollama.retries,
        temperature: config.ollama.temperature.map(|t| t as f32),
    };
    let llm = Arc::new(LlmClient::new(transport));

    let registry = Arc::new(qcode_tools::build_default_registry(Arc::clone(&llm)).context("failed to build tool registry")?);

    let orchestrator = Orchestrator::new(llm, registry, policy_gate, OrchestratorConfig::default());
    let response = orchestrator.process_query(query, config.working_directory.clone()).await;

    println!("{}", qcode_types::sanitize_terminal_text(&response.text));

    if !response.complete {
        for error in &response.errors {
            eprintln!("qcode: {}", error.message);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(config: &qcode_config::Config) {
    let level = if config.log.level.is_empty() { "info" } else { &config.log.level };
    let env_filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_qcode_log_file(config.log.file.clone());

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // If we can't open a log file, prefer "no logs" over writing to stdout
    // and corrupting the one piece of output the CLI promises to print.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_qcode_log_file(explicit: Option<PathBuf>) -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = match explicit {
        Some(path) => vec![path],
        None => qcode_log_file_candidates(),
    };
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn qcode_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: resolved config directory + logs/qcode.log.
    if let Some(global_config) = qcode_config::global_config_path()
        && let Some(config_dir) = global_config.parent()
    {
        candidates.push(config_dir.join("logs").join("qcode.log"));
    }

    // Fallback: ./.qcode/logs/qcode.log, useful in constrained environments
    // where the config home isn't writable.
    candidates.push(PathBuf::from(".qcode").join("logs").join("qcode.log"));

    candidates
}
