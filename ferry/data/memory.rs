use parking_lot::Mutex;

use super::DataRef;
use crate::{BridgeError, BridgeResult};

/// A range of a [`LinearMemory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// The base of a [`LinearMemory`] as captured at one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryView {
    base: usize,
    epoch: u64,
}

impl MemoryView {
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct MemoryState {
    bytes: Vec<u8>,
    epoch: u64,
    /// End of the last stored buffer
    top: usize,
}

impl MemoryState {
    fn check(&self, view: &MemoryView, offset: usize, len: usize) -> BridgeResult<()> {
        if view.epoch != self.epoch {
            return Err(BridgeError::StaleView {
                view_epoch: view.epoch,
                current_epoch: self.epoch,
            });
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            end => Err(BridgeError::OutOfBounds {
                offset,
                end: end.unwrap_or(usize::MAX),
                len: self.bytes.len(),
            }),
        }
    }

    fn grow(&mut self, additional: usize) -> usize {
        let previous = self.bytes.len();
        // Always relocates.
        let mut bytes = vec![0; previous + additional];
        bytes[..previous].copy_from_slice(&self.bytes);
        self.bytes = bytes;
        self.epoch += 1;
        tracing::trace!(previous, size = self.bytes.len(), epoch = self.epoch, "memory grew");
        previous
    }

    fn view(&self) -> MemoryView {
        MemoryView {
            base: self.bytes.as_ptr() as usize,
            epoch: self.epoch,
        }
    }
}

/// Growable memory of a sandboxed host.
///
/// Growing may relocate the memory. Every grow starts a new epoch, and accesses through a
/// [`MemoryView`] captured in an earlier epoch fail until the view is refreshed.
pub struct LinearMemory {
    state: Mutex<MemoryState>,
}

impl LinearMemory {
    pub fn new(size: usize) -> LinearMemory {
        LinearMemory {
            state: Mutex::new(MemoryState {
                bytes: vec![0; size],
                epoch: 0,
                top: 0,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().bytes.len()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn base_view(&self) -> MemoryView {
        self.state.lock().view()
    }

    /// Bring `view` up to the current epoch.
    pub fn refresh(&self, view: &mut MemoryView) {
        *view = self.base_view();
    }

    /// Grow by `additional` bytes, returning the previous size.
    pub fn grow(&self, additional: usize) -> usize {
        self.state.lock().grow(additional)
    }

    pub fn read(&self, view: &MemoryView, offset: usize, len: usize) -> BridgeResult<Vec<u8>> {
        let state = self.state.lock();
        state.check(view, offset, len)?;
        Ok(state.bytes[offset..offset + len].to_vec())
    }

    pub fn write(&self, view: &MemoryView, offset: usize, bytes: &[u8]) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.check(view, offset, bytes.len())?;
        state.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `data` into the memory after everything stored so far, growing it if needed.
    pub fn store(&self, data: &DataRef) -> Region {
        let mut state = self.state.lock();
        let region = Region {
            offset: state.top,
            len: data.len(),
        };
        if region.end() > state.bytes.len() {
            let additional = region.end() - state.bytes.len();
            state.grow(additional);
        }
        state.bytes[region.offset..region.end()].copy_from_slice(data);
        state.top = region.end();
        region
    }

    /// Copy a region out into a new buffer.
    pub fn load(&self, view: &MemoryView, region: Region) -> BridgeResult<DataRef> {
        self.read(view, region.offset, region.len).map(DataRef::from_vec)
    }
}

impl std::fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LinearMemory")
            .field("size", &state.bytes.len())
            .field("epoch", &state.epoch)
            .finish()
    }
}
