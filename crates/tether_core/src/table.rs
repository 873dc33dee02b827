//! Handle table
//!
//! Maps guest handles to host values. The guest-facing operations decode
//! names and payloads out of guest memory and then defer to the typed,
//! host-facing API (`insert`, `get`, `set_field`, ...), which other host
//! code can also use directly.

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleAllocator, HandlePolicy};
use crate::memory;
use crate::value::{Object, Value, ValueKind};
use std::collections::HashMap;
use tether_metrics::Counter;

/// Owner of every host value exposed to a guest.
///
/// One table serves one guest store. It is created explicitly and lives
/// until `shutdown` (or drop); nothing is evicted implicitly.
#[derive(Debug)]
pub struct HandleTable {
    entries: HashMap<Handle, Value>,
    allocator: HandleAllocator,
    counter: Counter,
}

impl HandleTable {
    /// Create an empty table with monotonic handles.
    pub fn new() -> Self {
        Self::with_policy(HandlePolicy::default())
    }

    pub fn with_policy(policy: HandlePolicy) -> Self {
        tracing::debug!(?policy, "handle table created");
        Self {
            entries: HashMap::new(),
            allocator: HandleAllocator::new(policy),
            counter: Counter::new(),
        }
    }

    pub fn policy(&self) -> HandlePolicy {
        self.allocator.policy()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Operation counters (empty unless the `metrics` feature is on).
    pub fn counters(&self) -> &Counter {
        &self.counter
    }

    // ------------------------------------------------------------------
    // Host-facing API
    // ------------------------------------------------------------------

    /// Register a value and return its handle.
    ///
    /// Null and undefined are singletons and resolve to their sentinel
    /// handles without allocating.
    pub fn insert(&mut self, value: impl Into<Value>) -> BridgeResult<Handle> {
        let value = value.into();
        match value {
            Value::Null => return Ok(Handle::NULL),
            Value::Undefined => return Ok(Handle::UNDEFINED),
            _ => {}
        }

        let handle = self.allocator.allocate()?;
        tracing::trace!(%handle, kind = %value.kind(), "entry created");
        self.entries.insert(handle, value);
        self.counter.increment("entries.created", 1);
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> BridgeResult<&Value> {
        if handle.is_sentinel() {
            return Err(BridgeError::SentinelHandle(handle));
        }
        self.entries
            .get(&handle)
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> BridgeResult<&mut Value> {
        if handle.is_sentinel() {
            return Err(BridgeError::SentinelHandle(handle));
        }
        self.entries
            .get_mut(&handle)
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Remove an entry and hand its value back to the caller.
    pub fn take(&mut self, handle: Handle) -> BridgeResult<Value> {
        if handle.is_sentinel() {
            return Err(BridgeError::SentinelHandle(handle));
        }
        let value = self
            .entries
            .remove(&handle)
            .ok_or(BridgeError::UnknownHandle(handle))?;
        self.allocator.release(handle);
        self.counter.increment("entries.freed", 1);
        tracing::trace!(%handle, "entry taken");
        Ok(value)
    }

    pub fn object(&self, handle: Handle) -> BridgeResult<&Object> {
        match self.get(handle)? {
            Value::Object(object) => Ok(object),
            other => Err(mismatch(handle, ValueKind::Object, other)),
        }
    }

    pub fn object_mut(&mut self, handle: Handle) -> BridgeResult<&mut Object> {
        match self.get_mut(handle)? {
            Value::Object(object) => Ok(object),
            other => Err(mismatch(handle, ValueKind::Object, other)),
        }
    }

    pub fn text(&self, handle: Handle) -> BridgeResult<&str> {
        match self.get(handle)? {
            Value::Text(text) => Ok(text),
            other => Err(mismatch(handle, ValueKind::Text, other)),
        }
    }

    pub fn bytes(&self, handle: Handle) -> BridgeResult<&[u8]> {
        match self.get(handle)? {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch(handle, ValueKind::Bytes, other)),
        }
    }

    /// Insert or overwrite a field on the object at `handle`.
    pub fn set_field(
        &mut self,
        handle: Handle,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> BridgeResult<()> {
        self.object_mut(handle)?.insert(name, value);
        Ok(())
    }

    /// Look up a field; `None` when the object lacks it.
    pub fn get_field(&self, handle: Handle, name: &str) -> BridgeResult<Option<&Value>> {
        Ok(self.object(handle)?.get(name))
    }

    /// Drop every entry. Returns how many were live.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        for (handle, _) in self.entries.drain() {
            self.allocator.release(handle);
        }
        self.counter.increment("entries.freed", dropped as u64);
        dropped
    }

    /// End the table's lifetime explicitly, logging what was still live.
    pub fn shutdown(mut self) -> usize {
        let dropped = self.clear();
        if dropped > 0 {
            tracing::info!(dropped, "handle table shut down with live entries");
        } else {
            tracing::debug!("handle table shut down");
        }
        dropped
    }

    // ------------------------------------------------------------------
    // Guest-facing API
    // ------------------------------------------------------------------

    /// Decode `len` bytes of guest memory at `ptr` as text and store it.
    pub fn create_string(&mut self, mem: &[u8], ptr: u32, len: u32) -> BridgeResult<Handle> {
        let text = memory::read_str(mem, ptr, len)?.into_owned();
        self.insert(Value::Text(text))
    }

    /// Copy `len` bytes of guest memory at `ptr` into an owned buffer.
    pub fn create_buffer(&mut self, mem: &[u8], ptr: u32, len: u32) -> BridgeResult<Handle> {
        let bytes = memory::read(mem, ptr, len)?.to_vec();
        self.insert(Value::Bytes(bytes))
    }

    pub fn create_object(&mut self) -> BridgeResult<Handle> {
        self.insert(Value::Object(Object::new()))
    }

    pub fn set_field_f32(
        &mut self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
        value: f32,
    ) -> BridgeResult<()> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        self.set_field(handle, name, Value::F32(value))
    }

    pub fn set_field_u32(
        &mut self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
        value: u32,
    ) -> BridgeResult<()> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        self.set_field(handle, name, Value::U32(value))
    }

    pub fn set_field_string(
        &mut self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
        value_ptr: u32,
        value_len: u32,
    ) -> BridgeResult<()> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        let value = memory::read_str(mem, value_ptr, value_len)?;
        self.set_field(handle, name, Value::Text(value.into_owned()))
    }

    /// True if the field exists and is not undefined.
    pub fn have_field(
        &self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
    ) -> BridgeResult<bool> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        let field = self.get_field(handle, &name)?;
        Ok(!matches!(field, None | Some(Value::Undefined)))
    }

    pub fn field_f32(
        &self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
    ) -> BridgeResult<f32> {
        self.field_num(mem, handle, name_ptr, name_len)
            .map(|value| value as f32)
    }

    pub fn field_u32(
        &self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
    ) -> BridgeResult<u32> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        match self.get_field(handle, &name)? {
            None | Some(Value::Null | Value::Undefined) => Ok(0),
            Some(value) => value
                .as_u32()
                .ok_or_else(|| field_mismatch(handle, &name, value)),
        }
    }

    /// Read a numeric field as `f64`. Absent or nullish fields read as 0.
    pub fn field_num(
        &self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
    ) -> BridgeResult<f64> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        match self.get_field(handle, &name)? {
            None | Some(Value::Null | Value::Undefined) => Ok(0.0),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| field_mismatch(handle, &name, value)),
        }
    }

    /// Register a copy of a field's value as a new entry.
    ///
    /// Every call allocates, even for a field read before. Null fields give
    /// `Handle::NULL`; absent or undefined fields give `Handle::UNDEFINED`.
    pub fn field(
        &mut self,
        mem: &[u8],
        handle: Handle,
        name_ptr: u32,
        name_len: u32,
    ) -> BridgeResult<Handle> {
        let name = memory::read_str(mem, name_ptr, name_len)?;
        let value = self
            .get_field(handle, &name)?
            .cloned()
            .unwrap_or(Value::Undefined);
        self.insert(value)
    }

    /// Byte length of the UTF-8 text at `handle`.
    pub fn string_length(&self, handle: Handle) -> BridgeResult<u32> {
        Ok(self.text(handle)?.len() as u32)
    }

    pub fn buf_length(&self, handle: Handle) -> BridgeResult<u32> {
        Ok(self.bytes(handle)?.len() as u32)
    }

    /// Write the text at `handle` into guest memory.
    ///
    /// `max_len` is the size of the guest's destination; it must hold the
    /// whole string (see `string_length`).
    pub fn unwrap_to_str(
        &self,
        handle: Handle,
        mem: &mut [u8],
        ptr: u32,
        max_len: u32,
    ) -> BridgeResult<()> {
        let text = self.text(handle)?;
        write_bounded(handle, mem, ptr, max_len, text.as_bytes())
    }

    /// Write the buffer at `handle` into guest memory.
    pub fn unwrap_to_buf(
        &self,
        handle: Handle,
        mem: &mut [u8],
        ptr: u32,
        max_len: u32,
    ) -> BridgeResult<()> {
        let bytes = self.bytes(handle)?;
        write_bounded(handle, mem, ptr, max_len, bytes)
    }

    /// Remove the entry at `handle`. Returns whether anything was removed.
    ///
    /// Freeing a missing handle is a no-op. Sentinels are never freed.
    pub fn free_object(&mut self, handle: Handle) -> bool {
        if handle.is_sentinel() {
            tracing::warn!(%handle, "attempt to free a sentinel handle ignored");
            return false;
        }
        match self.take(handle) {
            Ok(_) => true,
            Err(_) => {
                tracing::debug!(%handle, "free of unknown handle ignored");
                false
            }
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

fn write_bounded(
    handle: Handle,
    mem: &mut [u8],
    ptr: u32,
    max_len: u32,
    bytes: &[u8],
) -> BridgeResult<()> {
    if bytes.len() > max_len as usize {
        return Err(BridgeError::LengthMismatch {
            handle,
            required: bytes.len(),
            available: max_len,
        });
    }
    memory::write(mem, ptr, bytes)
}

fn mismatch(handle: Handle, expected: ValueKind, found: &Value) -> BridgeError {
    BridgeError::TypeMismatch {
        handle,
        expected,
        found: found.kind(),
    }
}

fn field_mismatch(handle: Handle, name: &str, found: &Value) -> BridgeError {
    BridgeError::FieldTypeMismatch {
        handle,
        name: name.to_owned(),
        expected: ValueKind::Number,
        found: found.kind(),
    }
}
