//! The traits that connect the collector to the objects and runtime using it.

use crate::{GcRef, Heap};

/// Receives the references an object reports while it is traced.
pub trait GcVisitor {
    /// A reference that keeps `target` alive.
    fn visit(&mut self, target: GcRef);

    /// A reference that does not keep `target` alive. Ignored by marking.
    fn visit_weak(&mut self, target: GcRef) {
        let _ = target;
    }

    #[inline]
    fn visit_opt(&mut self, target: Option<GcRef>) {
        if let Some(target) = target {
            self.visit(target);
        }
    }
}

/// An object stored in a [`Heap`].
pub trait Trace {
    fn trace(&self, visitor: &mut impl GcVisitor);
}

/// What the runtime provides to a collection: its roots and a hook that runs once marking is done.
pub trait GcContext<T: Trace> {
    fn visit_roots(&mut self, visitor: &mut impl GcVisitor);

    #[inline]
    fn trace_object(&mut self, object: &T, visitor: &mut impl GcVisitor) {
        object.trace(visitor);
    }

    /// Runs between marking and sweeping, when [`Heap::is_alive`] tells survivors apart. Clear
    /// weak references and process finalization registries here.
    fn process_weak_refs(&mut self, heap: &Heap<T>) {
        let _ = heap;
    }
}
