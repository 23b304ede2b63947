use std::path::PathBuf;
use std::sync::Arc;

use qcode_policy::PolicyGate;
use qcode_types::RequestId;

use crate::registry::ToolRegistry;

/// Read-only context constructed fresh per query (§3 `ToolContext`). Tools
/// never see a raw user path without routing it through `policy`.
#[derive(Clone)]
pub struct ToolContext {
    pub working_directory: PathBuf,
    pub policy: Arc<PolicyGate>,
    pub registry: Arc<ToolRegistry>,
    pub query: String,
    pub request_id: RequestId,
}

impl ToolContext {
    #[must_use]
    pub fn new(
        working_directory: PathBuf,
        policy: Arc<PolicyGate>,
        registry: Arc<ToolRegistry>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            working_directory,
            policy,
            registry,
            query: query.into(),
            request_id: RequestId::generate(),
        }
    }
}
