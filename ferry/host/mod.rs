//! The seam between the bridge and a garbage collected host runtime.
//!
//! A platform integration implements [`HostRuntime`] for its object model. The [`script`] module
//! provides an in-process implementation with a real tracing collector.

pub mod script;

use std::fmt;

use crate::{ExceptionToken, ProxyToken, WeakProxy};

/// Called with the token of a native proxy after the host collected it.
pub type FinalizerHook = Box<dyn Fn(ProxyToken) + Send + Sync>;

/// Callback receiving the outcome of a host promise.
pub type SettleCallback<H> = Box<
    dyn FnOnce(Result<<H as HostRuntime>::Value, <H as HostRuntime>::Error>) + Send,
>;

pub trait HostRuntime: Clone + Send + Sync + 'static {
    /// A strong reference to a host object. Keeps it from being collected.
    type Object: Clone + Send + Sync + 'static;

    /// A weak reference to a host object.
    type Weak: WeakProxy<Strong = Self::Object>;

    type Error: HostError;

    /// Values a host promise settles with.
    type Value: Send + 'static;

    type Promise: Clone + Send + Sync + 'static;

    type Resolvers: HostResolvers<Self::Value, Self::Error>;

    /// Identity of a host object, stable for as long as it is alive.
    fn object_id(&self, object: &Self::Object) -> u64;

    fn downgrade(&self, object: &Self::Object) -> Self::Weak;

    /// Install the hook called for each collected native proxy. Hooks run when the host chooses,
    /// possibly much later than the collection, and never while the host holds internal locks.
    fn install_finalizer(&self, hook: FinalizerHook);

    /// Create a host object standing in for a native object, registered for finalization under
    /// `token`.
    fn new_native_proxy(&self, token: ProxyToken) -> Self::Object;

    /// The token of a native proxy created by `new_native_proxy`, `None` for other objects.
    fn native_token(&self, object: &Self::Object) -> Option<ProxyToken>;

    /// Create a host error value carrying an optional back-reference to a native exception.
    fn new_error(&self, name: &str, message: &str, token: Option<ExceptionToken>) -> Self::Error;

    fn new_promise(&self) -> (Self::Promise, Self::Resolvers);

    /// Run `callback` once `promise` settles. Must not run it synchronously while holding host
    /// locks.
    fn on_settled(&self, promise: &Self::Promise, callback: SettleCallback<Self>);
}

/// Error values of a host runtime.
pub trait HostError: Clone + fmt::Debug + Send + Sync + 'static {
    /// The error's type name as the host reports it
    fn name(&self) -> String;

    fn message(&self) -> String;

    /// The native exception token this error carries, if it was created by the bridge.
    fn native_token(&self) -> Option<ExceptionToken>;
}

/// The settle side of a host promise.
pub trait HostResolvers<V, E>: Send + 'static {
    fn resolve(self, value: V);

    fn reject(self, error: E);
}
