//! Bridge configuration

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use tether_core::{HandlePolicy, HandleTable};

/// What a failed bridge call does to the guest.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the guest call with a trap.
    #[default]
    Trap,
    /// Log the error and return a zero or sentinel result.
    Lenient,
}

/// Bridge settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Import module the `js_*` functions are defined in.
    pub import_module: String,
    /// Name of the guest export holding its linear memory.
    pub memory_export: String,
    pub handle_policy: HandlePolicy,
    pub error_policy: ErrorPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            import_module: "env".to_string(),
            memory_export: "memory".to_string(),
            handle_policy: HandlePolicy::Monotonic,
            error_policy: ErrorPolicy::Trap,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(source: &str) -> Result<Self, HostError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Fresh table using the configured handle policy.
    pub fn handle_table(&self) -> HandleTable {
        HandleTable::with_policy(self.handle_policy)
    }
}
