//! Handles shared with the guest
//!
//! A handle is a plain `i32` on the wire. Negative values are reserved for
//! the null/undefined singletons, everything else names a table entry.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Guest-visible handle to a host value.
///
/// - `-1`: null (never allocated)
/// - `-2`: undefined (never allocated)
/// - `>= 0`: live table entry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i32);

impl Handle {
    pub const NULL: Handle = Handle(-1);
    pub const UNDEFINED: Handle = Handle(-2);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// True for the null and undefined singletons.
    pub const fn is_sentinel(self) -> bool {
        self.0 == Self::NULL.0 || self.0 == Self::UNDEFINED.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Handle::NULL => write!(f, "null"),
            Handle::UNDEFINED => write!(f, "undefined"),
            Handle(raw) => write!(f, "#{raw}"),
        }
    }
}

impl From<Handle> for i32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// How freed handles are treated.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlePolicy {
    /// Strictly increasing handles, never reused.
    #[default]
    Monotonic,
    /// Reuse freed slots, tagging each reuse with a new generation.
    Recycle,
}

/// Recycled handle layout: [0 | 7-bit generation | 24-bit slot index]
///
/// The sign bit stays clear so recycled handles never collide with sentinels.
const INDEX_BITS: u32 = 24;
const INDEX_MASK: i32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u8 = 0x7F;

/// Hands out handles according to a [`HandlePolicy`].
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    policy: HandlePolicy,
    next_id: i32,
    generations: Vec<u8>,
    free_slots: Vec<u32>,
}

impl HandleAllocator {
    pub fn new(policy: HandlePolicy) -> Self {
        Self {
            policy,
            next_id: 0,
            generations: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    pub fn policy(&self) -> HandlePolicy {
        self.policy
    }

    pub fn allocate(&mut self) -> BridgeResult<Handle> {
        match self.policy {
            HandlePolicy::Monotonic => {
                let id = self.next_id;
                self.next_id = id.checked_add(1).ok_or(BridgeError::HandlesExhausted)?;
                Ok(Handle(id))
            }
            HandlePolicy::Recycle => {
                let slot = match self.free_slots.pop() {
                    Some(slot) => slot,
                    None => {
                        let slot = self.generations.len() as u32;
                        if slot > INDEX_MASK as u32 {
                            return Err(BridgeError::HandlesExhausted);
                        }
                        self.generations.push(0);
                        slot
                    }
                };
                let generation = self.generations[slot as usize] as i32;
                Ok(Handle((generation << INDEX_BITS) | slot as i32))
            }
        }
    }

    /// Return a handle whose entry was just removed.
    ///
    /// Must only be called once per allocated handle. A slot whose
    /// generation is exhausted is retired rather than wrapped, so no
    /// handle value is ever issued twice.
    pub fn release(&mut self, handle: Handle) {
        if self.policy != HandlePolicy::Recycle {
            return;
        }
        let slot = (handle.0 & INDEX_MASK) as u32;
        let Some(generation) = self.generations.get_mut(slot as usize) else {
            return;
        };
        if *generation >= GENERATION_MASK {
            tracing::debug!(slot, "handle slot retired");
            return;
        }
        *generation += 1;
        self.free_slots.push(slot);
    }
}
