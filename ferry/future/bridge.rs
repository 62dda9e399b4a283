use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{NativeFuture, NativePromise, OperationId, PendingAsyncOperation};
use crate::{
    host::{HostResolvers, HostRuntime},
    BridgeError, BridgeResult, ExceptionBridge, NativeException,
};

type PendingTable = Mutex<HashMap<OperationId, Arc<dyn Any + Send + Sync>>>;

/// The operations of one session that are waiting for completion.
pub struct AsyncBridge {
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
}

impl AsyncBridge {
    pub fn new() -> AsyncBridge {
        AsyncBridge {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new operation. It leaves the table when it completes, however it is completed.
    pub fn begin<T: Send + 'static>(
        &self,
        continuation: impl FnOnce(Result<T, NativeException>) + Send + 'static,
    ) -> Arc<PendingAsyncOperation<T>> {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let table = Arc::downgrade(&self.pending);

        let operation = Arc::new(PendingAsyncOperation::new(
            id,
            Box::new(move |outcome| {
                if let Some(table) = table.upgrade() {
                    let removed = table.lock().remove(&id);
                    drop(removed);
                }
                continuation(outcome);
            }),
        ));

        self.pending.lock().insert(id, operation.clone());
        tracing::trace!(operation = %id, "began async operation");
        operation
    }

    /// Complete the pending operation `id`.
    pub fn complete<T: Send + 'static>(
        &self,
        id: OperationId,
        outcome: Result<T, NativeException>,
    ) -> BridgeResult<()> {
        let operation = self
            .pending
            .lock()
            .get(&id)
            .cloned()
            .ok_or(BridgeError::OperationNotPending { operation: id })?;

        let operation = operation
            .downcast::<PendingAsyncOperation<T>>()
            .map_err(|_| BridgeError::OperationTypeMismatch { operation: id })?;

        operation.complete(outcome)
    }

    pub fn resolve<T: Send + 'static>(&self, id: OperationId, value: T) -> BridgeResult<()> {
        self.complete(id, Ok(value))
    }

    pub fn reject<T: Send + 'static>(
        &self,
        id: OperationId,
        exception: NativeException,
    ) -> BridgeResult<()> {
        self.complete::<T>(id, Err(exception))
    }

    pub fn is_pending(&self, id: OperationId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// A host promise settled by `future`. Rejections cross through `exceptions`.
    pub fn native_to_host<H, T>(
        &self,
        host: &H,
        exceptions: &Arc<ExceptionBridge>,
        future: NativeFuture<T>,
        marshal: impl FnOnce(T) -> Result<H::Value, NativeException> + Send + 'static,
    ) -> H::Promise
    where
        H: HostRuntime,
        T: Send + 'static,
    {
        let (promise, resolvers) = host.new_promise();
        let host = host.clone();
        let exceptions = exceptions.clone();

        let operation = self.begin::<T>(move |outcome| match outcome.and_then(marshal) {
            Ok(value) => resolvers.resolve(value),
            Err(exception) => resolvers.reject(exceptions.to_host_error(&host, &exception)),
        });

        future.then(move |outcome| {
            if let Err(error) = operation.complete(outcome) {
                tracing::debug!(%error, "native future completed a finished operation");
            }
        });
        promise
    }

    /// A native future completed by the host `promise`. Rejections cross through `exceptions`.
    pub fn host_to_native<H, T>(
        &self,
        host: &H,
        exceptions: &Arc<ExceptionBridge>,
        promise: &H::Promise,
        unmarshal: impl FnOnce(H::Value) -> Result<T, NativeException> + Send + 'static,
    ) -> NativeFuture<T>
    where
        H: HostRuntime,
        T: Send + 'static,
    {
        let (native, future) = NativePromise::new();
        let operation = self.begin::<T>(move |outcome| match outcome {
            Ok(value) => native.resolve(value),
            Err(exception) => native.reject(exception),
        });

        let exceptions = exceptions.clone();
        let mut settlement = Settlement(Some(operation));
        host.on_settled(
            promise,
            Box::new(move |settled| {
                let outcome = match settled {
                    Ok(value) => unmarshal(value),
                    Err(error) => Err(exceptions.from_host_error::<H>(&error)),
                };
                settlement.complete(outcome);
            }),
        );
        future
    }
}

/// Completes its operation with `BrokenPromise` if the host drops the reaction without running
/// it, which happens when a promise is abandoned unsettled.
struct Settlement<T: Send + 'static>(Option<Arc<PendingAsyncOperation<T>>>);

impl<T: Send + 'static> Settlement<T> {
    fn complete(&mut self, outcome: Result<T, NativeException>) {
        if let Some(operation) = self.0.take() {
            if let Err(error) = operation.complete(outcome) {
                tracing::debug!(%error, "host promise completed a finished operation");
            }
        }
    }
}

impl<T: Send + 'static> Drop for Settlement<T> {
    fn drop(&mut self) {
        if self.0.is_some() {
            tracing::debug!("host promise dropped unsettled");
            self.complete(Err(NativeException::new(BridgeError::BrokenPromise)));
        }
    }
}

impl Default for AsyncBridge {
    fn default() -> Self {
        AsyncBridge::new()
    }
}

impl fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("pending", &self.pending_len())
            .finish()
    }
}
