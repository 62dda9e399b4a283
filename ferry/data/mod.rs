//! Byte buffers shared with the host.

mod memory;

#[cfg(test)]
mod tests;

use std::{fmt, ops::Deref, ptr::NonNull, slice};

use crate::{BridgeError, BridgeResult, Handle, MemoryModel};

pub use memory::{LinearMemory, MemoryView, Region};

/// A reference counted, immutable byte buffer.
///
/// Clones share the buffer. A buffer either owns its bytes or aliases memory that outlives it.
#[derive(Clone)]
pub struct DataRef {
    bytes: Handle<[u8]>,
}

/// A buffer as handed to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exposed {
    /// Zero-copy view sharing the buffer
    View(DataRef),
    /// Owned copy for a host with its own memory
    Copy(Vec<u8>),
}

impl DataRef {
    /// Take ownership of `bytes` without copying.
    pub fn from_vec(bytes: Vec<u8>) -> DataRef {
        DataRef {
            bytes: Handle::new(bytes).into_cast(Vec::as_slice),
        }
    }

    pub fn copy_from(bytes: &[u8]) -> DataRef {
        DataRef::from_vec(bytes.to_vec())
    }

    pub fn zeroed(len: usize) -> DataRef {
        DataRef::from_vec(vec![0; len])
    }

    /// Allocate `len` zeroed bytes and fill them with `init` before the buffer is shared.
    pub fn build(len: usize, init: impl FnOnce(&mut [u8])) -> DataRef {
        let mut bytes = vec![0; len];
        init(&mut bytes);
        DataRef::from_vec(bytes)
    }

    /// Alias memory that lives forever.
    pub fn from_static(bytes: &'static [u8]) -> DataRef {
        DataRef {
            bytes: Handle::from_static(bytes),
        }
    }

    /// Alias existing memory without owning it.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes, unmodified, for as long as any clone of the
    /// result is alive.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> BridgeResult<DataRef> {
        if ptr.is_null() {
            return Err(BridgeError::null_handle("DataRef::from_raw_parts"));
        }
        let bytes = NonNull::from(slice::from_raw_parts(ptr, len));
        Ok(DataRef {
            bytes: Handle::disconnected(bytes),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The handle owning the bytes, for keep-alive edges.
    #[inline]
    pub fn handle(&self) -> &Handle<[u8]> {
        &self.bytes
    }

    /// Whether both share the same bytes.
    pub fn ptr_eq(&self, other: &DataRef) -> bool {
        self.bytes.ptr_eq(&other.bytes) && self.len() == other.len()
    }

    pub fn expose(&self, model: MemoryModel) -> Exposed {
        match model {
            MemoryModel::SharedAddressSpace => Exposed::View(self.clone()),
            MemoryModel::Sandboxed => Exposed::Copy(self.as_slice().to_vec()),
        }
    }
}

impl Deref for DataRef {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for DataRef {
    fn from(bytes: Vec<u8>) -> Self {
        DataRef::from_vec(bytes)
    }
}

impl From<String> for DataRef {
    fn from(string: String) -> Self {
        DataRef::from_vec(string.into_bytes())
    }
}

impl PartialEq for DataRef {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for DataRef {}

impl fmt::Debug for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataRef({} bytes)", self.len())
    }
}
