use thiserror::Error;
use wasmi::errors::LinkerError;

/// Errors raised while setting up the bridge.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    #[error("failed to define '{module}::{function}'")]
    Link {
        module: String,
        function: &'static str,
        #[source]
        source: LinkerError,
    },

    #[error("guest does not export a linear memory named '{name}'")]
    MissingMemory { name: String },

    #[error("invalid bridge configuration")]
    Config(#[from] serde_json::Error),
}
