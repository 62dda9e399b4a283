//! Tracing collector for the reference script host.
//!
//! [`Heap`] stores objects in generation-checked slots named by [`GcRef`] and collects them with
//! an incremental tri-color mark and sweep. The runtime supplies roots through [`GcContext`],
//! objects report their references through [`Trace`], and a [`FinalizationRegistry`] queues held
//! values for targets that died.

#![no_std]
extern crate alloc;

mod finalization;
mod heap;
mod pointer;
mod visitor;

pub use finalization::FinalizationRegistry;
pub use heap::{GcPhase, Heap};
pub use pointer::GcRef;
pub use visitor::{GcContext, GcVisitor, Trace};
