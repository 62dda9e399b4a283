//! Nurse/patient edges between control blocks.
//!
//! A patient attached to a nurse is stored in the nurse's control block, so it stays alive at
//! least until the nurse's allocation is released. Edges that would close a cycle are rejected:
//! a cycle of keep-alive edges could never be released.

use std::ptr::{self, NonNull};

use hashbrown::HashSet;
use parking_lot::{const_mutex, Mutex};

use super::{control_block::BlockRef, ControlBlock, Handle};
use crate::{BridgeError, BridgeResult};

/// Serializes every attach so the cycle check and the insertion are atomic with respect to each
/// other. Releases do not take this lock.
static KEEP_ALIVE_GRAPH: Mutex<()> = const_mutex(());

/// Something a control block can hold on to until it is released.
pub trait Releasable: Send + Sync + 'static {
    /// Stable identity used to make attaching idempotent.
    fn identity(&self) -> usize;

    /// The control block this patient keeps alive, if any. Used to detect cycles.
    fn control_block(&self) -> Option<&ControlBlock> {
        None
    }
}

impl<T: ?Sized + Send + Sync + 'static> Releasable for Handle<T> {
    #[inline]
    fn identity(&self) -> usize {
        self.block_id()
    }

    #[inline]
    fn control_block(&self) -> Option<&ControlBlock> {
        Handle::control_block(self)
    }
}

impl<T: ?Sized> Handle<T> {
    /// Keep `patient` alive until this handle's allocation is released.
    ///
    /// Attaching the same patient twice has no further effect. Fails if this handle is empty or
    /// if the edge would form a keep-alive cycle.
    pub fn keep_alive<P: Releasable>(&self, patient: P) -> BridgeResult<()> {
        let Some(nurse) = self.control_block() else {
            tracing::warn!("rejected keep-alive on an empty nurse");
            return Err(BridgeError::ReleasedNurse);
        };

        let identity = patient.identity();

        // Strong references taken while walking the graph. Dropped only after both locks are
        // released, as is `patient` when it is not stored.
        let mut retained = Vec::new();

        {
            let _graph = KEEP_ALIVE_GRAPH.lock();

            if let Some(patient_block) = patient.control_block() {
                if reaches(patient_block, nurse, &mut retained) {
                    tracing::warn!(
                        nurse = nurse.id(),
                        patient = patient_block.id(),
                        "rejected keep-alive cycle"
                    );
                    return Err(BridgeError::KeepAliveCycle {
                        nurse: nurse.id(),
                        patient: patient_block.id(),
                    });
                }
            }

            let mut state = nurse.state().lock();
            if !state.patients.iter().any(|p| p.identity() == identity) {
                state.patients.push(Box::new(patient));
            }
        }

        drop(retained);
        Ok(())
    }
}

/// Keep `patient` alive at least as long as `nurse`'s allocation.
pub fn keep_alive<N, P>(nurse: &Handle<N>, patient: &Handle<P>) -> BridgeResult<()>
where
    N: ?Sized,
    P: ?Sized + Send + Sync + 'static,
{
    nurse.keep_alive(patient.clone())
}

/// Whether `target` is reachable from `start` through keep-alive edges, `start` included.
fn reaches(start: &ControlBlock, target: &ControlBlock, retained: &mut Vec<BlockRef>) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![NonNull::from(start)];

    while let Some(block) = stack.pop() {
        if ptr::eq(block.as_ptr(), target) {
            return true;
        }
        if !visited.insert(block.as_ptr() as usize) {
            continue;
        }

        // SAFETY: `start` is borrowed from the patient and every other block on the stack is
        // kept alive by a reference in `retained`.
        let state = unsafe { block.as_ref() }.state().lock();
        for patient in &state.patients {
            if let Some(child) = patient.control_block() {
                retained.push(child.retain());
                stack.push(NonNull::from(child));
            }
        }
    }

    false
}
