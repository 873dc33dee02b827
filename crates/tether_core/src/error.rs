use crate::handle::Handle;
use crate::value::ValueKind;
use thiserror::Error;

/// Errors surfaced by handle table operations.
///
/// The guest-facing contract treats all of these as caller bugs; the bridge
/// decides whether they trap the guest or are logged and swallowed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("handle {0} does not refer to a live entry")]
    UnknownHandle(Handle),

    #[error("handle {0} is a sentinel and has no entry")]
    SentinelHandle(Handle),

    #[error("handle {handle} holds {found}, expected {expected}")]
    TypeMismatch {
        handle: Handle,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("field '{name}' of handle {handle} holds {found}, expected {expected}")]
    FieldTypeMismatch {
        handle: Handle,
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("guest memory range {ptr}+{len} exceeds memory of {memory_size} bytes")]
    OutOfBoundsMemory {
        ptr: u32,
        len: u32,
        memory_size: usize,
    },

    #[error("handle {handle} needs {required} bytes but the destination holds {available}")]
    LengthMismatch {
        handle: Handle,
        required: usize,
        available: u32,
    },

    #[error("handle space exhausted")]
    HandlesExhausted,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
