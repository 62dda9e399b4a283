use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use parking_lot::Mutex;

use super::{Continuation, OperationId, OperationState};
use crate::{BridgeError, BridgeResult, NativeException};

/// One in-flight asynchronous crossing.
///
/// The state moves from pending to resolved or rejected exactly once. Of any number of racing
/// completions one wins and runs the continuation; the rest get `AlreadyCompleted`.
pub struct PendingAsyncOperation<T> {
    id: OperationId,
    state: AtomicU8,
    continuation: Mutex<Option<Continuation<T>>>,
}

impl<T> PendingAsyncOperation<T> {
    pub fn new(id: OperationId, continuation: Continuation<T>) -> PendingAsyncOperation<T> {
        PendingAsyncOperation {
            id,
            state: AtomicU8::new(OperationState::Pending as u8),
            continuation: Mutex::new(Some(continuation)),
        }
    }

    #[inline]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state() == OperationState::Pending
    }

    pub fn resolve(&self, value: T) -> BridgeResult<()> {
        self.complete(Ok(value))
    }

    pub fn reject(&self, exception: NativeException) -> BridgeResult<()> {
        self.complete(Err(exception))
    }

    pub fn complete(&self, outcome: Result<T, NativeException>) -> BridgeResult<()> {
        let target = match &outcome {
            Ok(_) => OperationState::Resolved,
            Err(_) => OperationState::Rejected,
        };

        if let Err(current) = self.state.compare_exchange(
            OperationState::Pending as u8,
            target as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            let state = OperationState::from_u8(current);
            tracing::warn!(
                operation = %self.id,
                %state,
                "rejected completion of a finished operation"
            );
            return Err(BridgeError::AlreadyCompleted {
                operation: self.id,
                state,
            });
        }

        let continuation = self.continuation.lock().take();
        if let Some(continuation) = continuation {
            continuation(outcome);
        }
        Ok(())
    }
}

impl<T> fmt::Debug for PendingAsyncOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAsyncOperation")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
