use std::{fmt, sync::Arc};

use crate::{
    data::Exposed,
    host::HostRuntime,
    proxy::{HostProxy, HostToNative, NativeToHost},
    AsyncBridge, BridgeOptions, BridgeResult, DataRef, ExceptionBridge, Handle, NativeException,
    NativeFuture,
};

struct SessionInner<H: HostRuntime> {
    host: H,
    options: BridgeOptions,
    native_to_host: NativeToHost<H>,
    host_to_native: HostToNative<H>,
    exceptions: Arc<ExceptionBridge>,
    async_bridge: AsyncBridge,
}

/// Everything the bridge keeps for one host realm: both proxy caches, the exception registry and
/// the pending async operations.
///
/// Creating a session installs its finalizer hook in the host. The hook holds the session weakly,
/// so finalizers that run after the session is gone do nothing.
pub struct BridgeSession<H: HostRuntime> {
    inner: Arc<SessionInner<H>>,
}

impl<H: HostRuntime> BridgeSession<H> {
    pub fn new(host: H, options: BridgeOptions) -> BridgeSession<H> {
        let inner = Arc::new(SessionInner {
            native_to_host: NativeToHost::new(options.prune_threshold),
            host_to_native: HostToNative::new(options.prune_threshold),
            exceptions: Arc::new(ExceptionBridge::new(
                options.exception_capacity,
                options.error_prefix.clone(),
            )),
            async_bridge: AsyncBridge::new(),
            host,
            options,
        });

        let session = Arc::downgrade(&inner);
        inner.host.install_finalizer(Box::new(move |token| {
            if let Some(session) = session.upgrade() {
                session.native_to_host.finalize(token);
            }
        }));

        BridgeSession { inner }
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    #[inline]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// The host object for a native handle.
    ///
    /// A handle to a native proxy of a host object unwraps to that object. Any other handle gets
    /// its cached host proxy, created on first use. Empty handles are rejected.
    pub fn to_host<T>(&self, handle: &Handle<T>) -> BridgeResult<H::Object>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !handle.is_empty() {
            let unwrapped = self
                .inner
                .host_to_native
                .host_object_for_block(handle.block_id());
            if let Some(object) = unwrapped {
                return Ok(object);
            }
        }
        self.inner.native_to_host.get_or_create(&self.inner.host, handle)
    }

    /// The native handle behind `object` if it is a proxy of a native `T`.
    pub fn native_of<T>(&self, object: &H::Object) -> Option<Handle<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.native_to_host.unwrap(&self.inner.host, object)
    }

    /// The native view of a host object as `T`.
    ///
    /// A host proxy of a native `T` unwraps to the original handle. Any other object gets its
    /// cached native proxy of type `P`, created with `create` on first use and seen through
    /// `view`.
    pub fn from_host<T, P>(
        &self,
        object: &H::Object,
        create: impl FnOnce(HostProxy<H>) -> P,
        view: impl FnOnce(&P) -> &T,
    ) -> Handle<T>
    where
        T: ?Sized + Send + Sync + 'static,
        P: Send + Sync + 'static,
    {
        if let Some(native) = self.native_of::<T>(object) {
            return native;
        }
        self.host_proxy(object, create).into_cast(view)
    }

    /// The cached native proxy of type `P` for `object`.
    pub fn host_proxy<P>(
        &self,
        object: &H::Object,
        create: impl FnOnce(HostProxy<H>) -> P,
    ) -> Handle<P>
    where
        P: Send + Sync + 'static,
    {
        self.inner
            .host_to_native
            .get_or_create(&self.inner.host, object, create)
    }

    pub fn to_host_error(&self, exception: &NativeException) -> H::Error {
        self.inner.exceptions.to_host_error(&self.inner.host, exception)
    }

    pub fn from_host_error(&self, error: &H::Error) -> NativeException {
        self.inner.exceptions.from_host_error::<H>(error)
    }

    pub fn check_host_result<T>(&self, result: Result<T, H::Error>) -> Result<T, NativeException> {
        self.inner.exceptions.check_host_result::<H, T>(result)
    }

    pub fn future_to_host<T: Send + 'static>(
        &self,
        future: NativeFuture<T>,
        marshal: impl FnOnce(T) -> Result<H::Value, NativeException> + Send + 'static,
    ) -> H::Promise {
        self.inner
            .async_bridge
            .native_to_host(&self.inner.host, &self.inner.exceptions, future, marshal)
    }

    pub fn promise_to_native<T: Send + 'static>(
        &self,
        promise: &H::Promise,
        unmarshal: impl FnOnce(H::Value) -> Result<T, NativeException> + Send + 'static,
    ) -> NativeFuture<T> {
        self.inner
            .async_bridge
            .host_to_native(&self.inner.host, &self.inner.exceptions, promise, unmarshal)
    }

    /// A byte buffer as handed to the host under the session's memory model.
    pub fn expose(&self, data: &DataRef) -> Exposed {
        data.expose(self.inner.options.memory_model)
    }

    pub fn native_to_host(&self) -> &NativeToHost<H> {
        &self.inner.native_to_host
    }

    pub fn host_to_native(&self) -> &HostToNative<H> {
        &self.inner.host_to_native
    }

    pub fn exceptions(&self) -> &ExceptionBridge {
        &self.inner.exceptions
    }

    pub fn async_bridge(&self) -> &AsyncBridge {
        &self.inner.async_bridge
    }
}

impl<H: HostRuntime> Clone for BridgeSession<H> {
    fn clone(&self) -> Self {
        BridgeSession {
            inner: self.inner.clone(),
        }
    }
}

impl<H: HostRuntime> fmt::Debug for BridgeSession<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSession")
            .field("held", &self.inner.native_to_host.held_count())
            .field("host_proxies", &self.inner.host_to_native.len())
            .field("pending", &self.inner.async_bridge.pending_len())
            .finish()
    }
}
