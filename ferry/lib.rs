//! Ferry: sharing object lifetimes between native code and garbage collected hosts.
//!
//! Native objects are owned by reference counted [`Handle`]s whose control blocks can keep other
//! handles alive ([`keep_alive`]). Returned references become handles through a statically chosen
//! [`ReturnValuePolicy`]. A [`BridgeSession`] owns the per-direction proxy caches, the exception
//! registry and the table of pending async operations for one host realm.

pub mod common;
pub mod data;
pub mod exception;
pub mod future;
pub mod handle;
pub mod host;
pub mod policy;
pub mod proxy;
mod session;

pub use common::error::{BridgeError, BridgeResult};
pub use common::options::{BridgeOptions, BridgeOptionsBuilder, MemoryModel};
pub use data::{DataRef, LinearMemory, MemoryView};
pub use exception::{ExceptionBridge, ExceptionToken, HostException, NativeException};
pub use future::{AsyncBridge, NativeFuture, NativePromise, OperationId, PendingAsyncOperation};
pub use handle::{keep_alive, Handle, Releasable, WeakHandle};
pub use policy::{PolicyKind, ReturnValuePolicy};
pub use proxy::{ProxyCache, ProxyToken, WeakProxy};
pub use session::BridgeSession;
