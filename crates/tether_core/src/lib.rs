//! Tether Core
//!
//! Host-side handle table for WASM guests:
//! - Integer handles with reserved null/undefined sentinels
//! - Tagged values (text, bytes, objects, numbers)
//! - Bounds-checked access to guest linear memory
//!
//! The table knows nothing about any WASM engine. Guest memory is passed
//! in as a plain byte slice on every call; `tether_host` wires the table
//! into a `wasmi` linker.

pub mod error;
pub mod handle;
pub mod memory;
pub mod table;
pub mod value;

pub use error::{BridgeError, BridgeResult};
pub use handle::{Handle, HandlePolicy};
pub use table::HandleTable;
pub use value::{Object, Value, ValueKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
