//! Arena references
//!
//! `GcRef` names an object in a `Heap` by slot index and generation. It is not a
//! root: an unrooted `GcRef` may stop resolving after the next collection.

use core::fmt;

/// A reference to a GC-managed object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> GcRef {
        GcRef { index, generation }
    }

    /// Slot index in the owning heap
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({}v{})", self.index, self.generation)
    }
}
