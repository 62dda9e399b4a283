use crate::future::{OperationId, OperationState};

/// Errors reported by the bridge itself.
///
/// Failures of user code crossing the boundary are carried as
/// [`NativeException`](crate::NativeException)s and host errors, never as `BridgeError`s.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot attach a patient to an empty or released nurse")]
    ReleasedNurse,

    #[error("keep-alive edge from block {nurse:#x} to block {patient:#x} would form a cycle")]
    KeepAliveCycle { nurse: usize, patient: usize },

    #[error("nullptr is not allowed in {context}")]
    NullHandle { context: String },

    #[error("operation {operation} was already {state}")]
    AlreadyCompleted {
        operation: OperationId,
        state: OperationState,
    },

    #[error("operation {operation} is not pending")]
    OperationNotPending { operation: OperationId },

    #[error("operation {operation} does not produce a value of the requested type")]
    OperationTypeMismatch { operation: OperationId },

    #[error("memory view from epoch {view_epoch} is stale, memory is at epoch {current_epoch}")]
    StaleView {
        view_epoch: u64,
        current_epoch: u64,
    },

    #[error("range {offset}..{end} is out of bounds for length {len}")]
    OutOfBounds { offset: usize, end: usize, len: usize },

    #[error("promise was dropped without being fulfilled")]
    BrokenPromise,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Error for a required handle that turned out to be empty at a boundary crossing.
    pub fn null_handle(context: impl Into<String>) -> BridgeError {
        BridgeError::NullHandle {
            context: context.into(),
        }
    }
}
