use std::{
    any::{Any, TypeId},
    fmt,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{ProxyCache, ProxyToken};
use crate::{host::HostRuntime, BridgeError, BridgeResult, Handle};

/// Identity of a native object exposed to the host: its address and the interface it is
/// exposed as. Two views of one allocation as different interfaces get different proxies.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeKey {
    addr: usize,
    type_id: TypeId,
}

impl NativeKey {
    pub fn of<T: ?Sized + 'static>(handle: &Handle<T>) -> NativeKey {
        NativeKey {
            addr: handle.addr(),
            type_id: TypeId::of::<T>(),
        }
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }
}

impl fmt::Debug for NativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeKey({:#x})", self.addr)
    }
}

/// The native handle paired with a host proxy. Released when the host finalizes the proxy.
struct HeldNative {
    key: NativeKey,
    /// A `Handle<T>` for the exposed interface `T`
    handle: Box<dyn Any + Send + Sync>,
}

/// Native objects exposed to the host.
///
/// The host proxy is the only thing keeping its native object alive from the host side. The
/// paired handle is held here, by token, until the host reports the proxy collected.
pub struct NativeToHost<H: HostRuntime> {
    cache: ProxyCache<NativeKey, H::Weak>,
    held: Mutex<HashMap<ProxyToken, HeldNative>>,
}

impl<H: HostRuntime> NativeToHost<H> {
    pub fn new(prune_threshold: usize) -> NativeToHost<H> {
        NativeToHost {
            cache: ProxyCache::new("native_to_host", prune_threshold),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// The host proxy for `handle`, created on first use. Empty handles cannot cross.
    pub fn get_or_create<T>(&self, host: &H, handle: &Handle<T>) -> BridgeResult<H::Object>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if handle.is_empty() {
            return Err(BridgeError::null_handle("native object passed to host"));
        }

        let key = NativeKey::of(handle);
        self.cache.get_or_create(key, |token| {
            let object = host.new_native_proxy(token);
            let weak = host.downgrade(&object);
            self.held.lock().insert(
                token,
                HeldNative {
                    key,
                    handle: Box::new(handle.clone()),
                },
            );
            Ok((object, weak))
        })
    }

    /// The live host proxy for `handle`, without creating one.
    pub fn lookup<T: ?Sized + 'static>(&self, handle: &Handle<T>) -> Option<H::Object> {
        self.cache.lookup(&NativeKey::of(handle))
    }

    /// The native handle behind a host object that is one of our proxies. `None` if the object
    /// is not a native proxy, or is one for a different interface.
    pub fn unwrap<T>(&self, host: &H, object: &H::Object) -> Option<Handle<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let token = host.native_token(object)?;
        let held = self.held.lock();
        held.get(&token)?.handle.downcast_ref::<Handle<T>>().cloned()
    }

    /// Finalization of the host proxy created with `token`. Unknown tokens are expected: the
    /// native side may already have released everything.
    pub fn finalize(&self, token: ProxyToken) -> bool {
        let Some(held) = self.held.lock().remove(&token) else {
            tracing::trace!(%token, "finalized a proxy that is no longer held");
            return false;
        };

        self.cache.finalize(&held.key, token);
        drop(held);
        true
    }

    /// Number of native objects currently held for the host.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    pub fn cache(&self) -> &ProxyCache<NativeKey, H::Weak> {
        &self.cache
    }
}
