//! Tool Set and Registry (§4.2, §4.3) — the built-in tool providers
//! (Files, Edit, Shell, Project Intelligence) plus the registry that holds,
//! namespaces, and dispatches them.

pub mod context;
mod edit;
mod files;
pub mod process;
mod project;
pub mod registry;
mod shell;

pub use context::ToolContext;
pub use registry::{NamespacedTool, ToolExecuteFn, ToolFuture, ToolRegistry, ToolStats};

use std::sync::Arc;

use qcode_llm::LlmClient;
use qcode_types::Error;

/// Build a registry pre-populated with the four built-in `internal:*` tools
/// (§4.3). Project Intelligence keeps its own `LlmClient` handle since it
/// issues a nested `chat` call independent of the orchestration loop's turn.
pub fn build_default_registry(llm: Arc<LlmClient>) -> Result<ToolRegistry, Error> {
    let mut registry = ToolRegistry::new();
    registry.register(files::definition(), false)?;
    registry.register(edit::definition(), false)?;
    registry.register(shell::definition(), false)?;
    registry.register(project::definition(llm), false)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcode_llm::TransportConfig;

    #[test]
    fn default_registry_registers_all_four_builtins() {
        let llm = Arc::new(LlmClient::new(TransportConfig::default()));
        let registry = build_default_registry(llm).unwrap();
        for name in ["internal:files", "internal:edit", "internal:shell", "internal:project"] {
            assert!(registry.lookup(name).is_ok(), "{name} should be registered");
        }
    }
}
