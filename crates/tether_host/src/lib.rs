//! Tether Host Bridge
//!
//! Exposes a [`HandleTable`](tether_core::HandleTable) to WASM guests running
//! on `wasmi`.
//!
//! ## Architecture
//!
//! - **Plugins:** named, versioned bundles of host functions
//! - **Loader:** wires every registered plugin into a `Linker` before instantiation
//! - **JsUtils:** the `js_*` handle table imports
//!
//! Store data only has to implement [`HostState`] to be usable with the bridge.

pub mod config;
pub mod error;
pub mod jsutils;
pub mod plugin;

pub use config::{BridgeConfig, ErrorPolicy};
pub use error::HostError;
pub use jsutils::JsUtils;
pub use plugin::{Plugin, PluginLoader};

pub use tether_core;
pub use wasmi;

use tether_core::HandleTable;

/// Store data that owns a handle table.
pub trait HostState {
    fn handle_table(&mut self) -> &mut HandleTable;
}

impl HostState for HandleTable {
    fn handle_table(&mut self) -> &mut HandleTable {
        self
    }
}
