//! Finalization registry
//!
//! Associates a held value with a target object. When a collection finds the
//! target unreachable the held value moves to a pending queue. Nothing is
//! invoked here: the runtime drains the queue whenever it chooses to run
//! finalizers, which may be many collections later.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::{GcRef, Heap, Trace};

pub struct FinalizationRegistry<H> {
    cells: Vec<Cell<H>>,
    pending: VecDeque<H>,
}

struct Cell<H> {
    target: GcRef,
    held: H,
}

impl<H> FinalizationRegistry<H> {
    pub const fn new() -> FinalizationRegistry<H> {
        FinalizationRegistry {
            cells: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Register `held` to be queued once `target` is collected.
    pub fn register(&mut self, target: GcRef, held: H) {
        self.cells.push(Cell { target, held });
    }

    /// Remove every registration for `target`, returning the held values.
    pub fn unregister(&mut self, target: GcRef) -> Vec<H> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.cells.len() {
            if self.cells[i].target == target {
                removed.push(self.cells.swap_remove(i).held);
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Number of live registrations
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Move the held values of every dead target to the pending queue.
    ///
    /// Must be called from `GcContext::process_weak_refs`, when liveness
    /// reflects the finished marking phase.
    pub fn process<T: Trace>(&mut self, heap: &Heap<T>) {
        let mut i = 0;
        while i < self.cells.len() {
            if heap.is_alive(self.cells[i].target) {
                i += 1;
            } else {
                let cell = self.cells.swap_remove(i);
                self.pending.push_back(cell.held);
            }
        }
    }

    /// Drain the pending queue in the order targets were found dead.
    pub fn take_pending(&mut self) -> Vec<H> {
        self.pending.drain(..).collect()
    }
}

impl<H> Default for FinalizationRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
