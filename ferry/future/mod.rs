//! Asynchronous completion across the boundary.
//!
//! [`NativePromise`]/[`NativeFuture`] is the native single-shot completion pair. A
//! [`PendingAsyncOperation`] is one in-flight crossing, completed exactly once. The
//! [`AsyncBridge`] tracks the operations of a session and converts futures to host promises and
//! back. Nothing here cancels: dropping either side of a crossing never completes the other.

mod bridge;
mod pending;
mod promise;

#[cfg(test)]
mod tests;

use std::fmt;

pub use bridge::AsyncBridge;
pub use pending::PendingAsyncOperation;
pub use promise::{NativeFuture, NativePromise};

use crate::NativeException;

/// Receives the outcome of an operation.
pub type Continuation<T> = Box<dyn FnOnce(Result<T, NativeException>) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationState {
    Pending = 0,
    Resolved = 1,
    Rejected = 2,
}

impl OperationState {
    fn from_u8(raw: u8) -> OperationState {
        match raw {
            0 => OperationState::Pending,
            1 => OperationState::Resolved,
            _ => OperationState::Rejected,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Pending => "pending",
            OperationState::Resolved => "resolved",
            OperationState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}
