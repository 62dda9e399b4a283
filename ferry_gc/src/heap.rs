//! The object arena and its collector.
//!
//! Objects are stored by value in slots. A slot that is freed bumps its generation before it is
//! reused, so a `GcRef` to the old occupant stops resolving instead of aliasing the new one.
//!
//! Collection is incremental tri-color mark and sweep:
//! roots are shaded gray, gray objects are scanned and turned black, the runtime gets one look at
//! the finished marking to process weak references, and white objects are swept. Swept values
//! are handed back through `take_swept` instead of being dropped here.

use alloc::vec::Vec;
use core::mem;

use crate::{
    visitor::{GcContext, GcVisitor, Trace},
    GcRef,
};

/// Gray objects scanned per `gc_step`
const MARK_BUDGET: usize = 100;
/// Slots examined per `gc_step`
const SWEEP_BUDGET: usize = 100;
/// Live objects needed before `should_gc` first asks for a collection
const MIN_THRESHOLD: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GcColor {
    /// Not reached yet, swept if still white when marking ends
    White,
    /// Reached, references not scanned yet
    Gray,
    /// Reached and scanned
    Black,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GcPhase {
    #[default]
    Idle,
    RootScanning,
    Marking,
    WeakRefProcessing,
    Sweeping,
}

struct Slot<T> {
    generation: u32,
    /// `None` while the slot is vacant
    color: Option<GcColor>,
    /// Empty while vacant, and briefly while the object is being traced
    value: Option<T>,
}

impl<T> Slot<T> {
    #[inline]
    fn holds(&self, target: GcRef) -> bool {
        self.color.is_some() && self.generation == target.generation()
    }

    fn free(&mut self) -> Option<T> {
        self.color = None;
        self.generation = self.generation.wrapping_add(1);
        self.value.take()
    }
}

pub struct Heap<T> {
    slots: Vec<Slot<T>>,
    vacant: Vec<u32>,
    live: usize,
    threshold: usize,

    phase: GcPhase,
    gray: Vec<u32>,
    mark_budget: usize,
    sweep_budget: usize,
    sweep_cursor: usize,
    freed: usize,
    swept: Vec<T>,

    #[cfg(feature = "gc_stress_test")]
    pub gc_stress_test: bool,
}

impl<T: Trace> Heap<T> {
    pub const fn new() -> Heap<T> {
        Heap {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
            threshold: MIN_THRESHOLD,
            phase: GcPhase::Idle,
            gray: Vec::new(),
            mark_budget: MARK_BUDGET,
            sweep_budget: SWEEP_BUDGET,
            sweep_cursor: 0,
            freed: 0,
            swept: Vec::new(),
            #[cfg(feature = "gc_stress_test")]
            gc_stress_test: false,
        }
    }

    pub fn set_step_sizes(&mut self, mark_budget: usize, sweep_budget: usize) {
        self.mark_budget = mark_budget.max(1);
        self.sweep_budget = sweep_budget.max(1);
    }

    #[inline]
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    #[inline]
    pub fn gc_in_progress(&self) -> bool {
        self.phase != GcPhase::Idle
    }

    #[inline]
    pub fn is_marking(&self) -> bool {
        matches!(self.phase, GcPhase::RootScanning | GcPhase::Marking)
    }

    /// Store `value` in a free slot.
    ///
    /// A cycle in progress is advanced by one step first. Objects allocated mid-cycle start black
    /// and survive it.
    pub fn alloc(&mut self, ctx: &mut impl GcContext<T>, value: T) -> GcRef {
        if self.gc_in_progress() {
            self.gc_step(ctx);
        }
        let color = if self.gc_in_progress() {
            GcColor::Black
        } else {
            GcColor::White
        };

        self.live += 1;
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.color = Some(color);
            slot.value = Some(value);
            return GcRef::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            color: Some(color),
            value: Some(value),
        });
        GcRef::new(index, 0)
    }

    /// Whether the live set has grown enough to start a cycle.
    #[inline]
    pub fn should_gc(&self) -> bool {
        if self.gc_in_progress() {
            return false;
        }
        #[cfg(feature = "gc_stress_test")]
        if self.gc_stress_test {
            return true;
        }
        self.live > self.threshold
    }

    #[inline]
    pub fn num_objects(&self) -> usize {
        self.live
    }

    /// Whether `target` still names an object that has not been swept.
    #[inline]
    pub fn contains(&self, target: GcRef) -> bool {
        self.slot(target).is_some()
    }

    #[inline]
    pub fn get(&self, target: GcRef) -> Option<&T> {
        self.slot(target)?.value.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, target: GcRef) -> Option<&mut T> {
        let slot = self.slots.get_mut(target.index() as usize)?;
        if slot.holds(target) {
            slot.value.as_mut()
        } else {
            None
        }
    }

    #[inline]
    fn slot(&self, target: GcRef) -> Option<&Slot<T>> {
        self.slots
            .get(target.index() as usize)
            .filter(|slot| slot.holds(target))
    }

    /// Values freed since the last call, for the runtime to drop when convenient.
    pub fn take_swept(&mut self) -> Vec<T> {
        mem::take(&mut self.swept)
    }

    /// Objects freed by the running cycle, or by the last one once it finished.
    #[inline]
    pub fn objects_freed_this_cycle(&self) -> usize {
        self.freed
    }

    /// Whether `target` was reached by marking. Meaningful from weak processing on.
    #[inline]
    pub fn is_alive(&self, target: GcRef) -> bool {
        self.slot(target)
            .is_some_and(|slot| slot.color != Some(GcColor::White))
    }

    // ============================================================================
    // Cycle control
    // ============================================================================

    /// Shade the roots and begin marking. Does nothing if a cycle is already running.
    pub fn start_gc(&mut self, ctx: &mut impl GcContext<T>) {
        if self.gc_in_progress() {
            return;
        }
        self.phase = GcPhase::RootScanning;
        self.freed = 0;
        ctx.visit_roots(&mut self.shade());
        self.phase = GcPhase::Marking;
    }

    /// Do one bounded unit of work. Returns whether the cycle is still running.
    pub fn gc_step(&mut self, ctx: &mut impl GcContext<T>) -> bool {
        match self.phase {
            GcPhase::Idle => return false,
            GcPhase::RootScanning => self.phase = GcPhase::Marking,
            GcPhase::Marking => self.mark(ctx),
            GcPhase::WeakRefProcessing => {
                ctx.process_weak_refs(self);
                self.sweep_cursor = 0;
                self.phase = GcPhase::Sweeping;
            }
            GcPhase::Sweeping => self.sweep(),
        }
        self.gc_in_progress()
    }

    /// Run the current cycle to completion, returning the number of steps it took.
    pub fn finish_gc(&mut self, ctx: &mut impl GcContext<T>) -> usize {
        let mut steps = 1;
        while self.gc_step(ctx) {
            steps += 1;
        }
        steps
    }

    /// A complete cycle, starting one if none is running.
    pub fn collect(&mut self, ctx: &mut impl GcContext<T>) -> usize {
        self.start_gc(ctx);
        self.finish_gc(ctx)
    }

    /// Insertion barrier. Call after storing a reference to `target` into any object.
    #[inline]
    pub fn write_barrier(&mut self, target: GcRef) {
        if self.is_marking() {
            self.shade().visit(target);
        }
    }

    fn shade(&mut self) -> Shade<'_, T> {
        Shade {
            slots: &mut self.slots,
            gray: &mut self.gray,
        }
    }

    fn mark(&mut self, ctx: &mut impl GcContext<T>) {
        for _ in 0..self.mark_budget {
            let Some(index) = self.gray.pop() else {
                self.phase = GcPhase::WeakRefProcessing;
                return;
            };

            let slot = &mut self.slots[index as usize];
            slot.color = Some(GcColor::Black);
            // Traced out of its slot so the object can shade its neighbours
            if let Some(value) = slot.value.take() {
                ctx.trace_object(&value, &mut self.shade());
                self.slots[index as usize].value = Some(value);
            }
        }
    }

    fn sweep(&mut self) {
        let end = (self.sweep_cursor + self.sweep_budget).min(self.slots.len());
        for index in self.sweep_cursor..end {
            let slot = &mut self.slots[index];
            match slot.color {
                Some(GcColor::White) => {
                    self.swept.extend(slot.free());
                    self.vacant.push(index as u32);
                    self.freed += 1;
                }
                Some(_) => slot.color = Some(GcColor::White),
                None => {}
            }
        }
        self.sweep_cursor = end;

        if self.sweep_cursor == self.slots.len() {
            self.live -= self.freed;
            self.threshold = (self.live * 2).max(MIN_THRESHOLD);
            self.phase = GcPhase::Idle;
        }
    }
}

impl<T: Trace> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns white objects gray and queues them for scanning.
struct Shade<'a, T> {
    slots: &'a mut Vec<Slot<T>>,
    gray: &'a mut Vec<u32>,
}

impl<T> GcVisitor for Shade<'_, T> {
    fn visit(&mut self, target: GcRef) {
        let Some(slot) = self.slots.get_mut(target.index() as usize) else {
            return;
        };
        if slot.holds(target) && slot.color == Some(GcColor::White) {
            slot.color = Some(GcColor::Gray);
            self.gray.push(target.index());
        }
    }
}
