//! Bounds-checked access to guest linear memory
//!
//! Guest memory is whatever byte slice the embedder hands over. Pointers and
//! lengths come straight from the guest, so every range is validated before
//! it is touched.

use crate::error::{BridgeError, BridgeResult};
use std::borrow::Cow;
use std::ops::Range;

fn range(memory_size: usize, ptr: u32, len: u32) -> BridgeResult<Range<usize>> {
    let start = ptr as usize;
    start
        .checked_add(len as usize)
        .filter(|&end| end <= memory_size)
        .map(|end| start..end)
        .ok_or(BridgeError::OutOfBoundsMemory {
            ptr,
            len,
            memory_size,
        })
}

/// Borrow `len` bytes at `ptr`.
pub fn read(mem: &[u8], ptr: u32, len: u32) -> BridgeResult<&[u8]> {
    let range = range(mem.len(), ptr, len)?;
    Ok(&mem[range])
}

/// Decode `len` bytes at `ptr` as UTF-8, replacing invalid sequences.
pub fn read_str(mem: &[u8], ptr: u32, len: u32) -> BridgeResult<Cow<'_, str>> {
    read(mem, ptr, len).map(String::from_utf8_lossy)
}

/// Copy `bytes` into guest memory at `ptr`.
pub fn write(mem: &mut [u8], ptr: u32, bytes: &[u8]) -> BridgeResult<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| BridgeError::OutOfBoundsMemory {
        ptr,
        len: u32::MAX,
        memory_size: mem.len(),
    })?;
    let range = range(mem.len(), ptr, len)?;
    mem[range].copy_from_slice(bytes);
    Ok(())
}
