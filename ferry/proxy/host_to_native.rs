use std::{
    any::{Any, TypeId},
    convert::Infallible,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Weak,
    },
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{ProxyCache, ProxyToken, WeakProxy};
use crate::{host::HostRuntime, Handle, WeakHandle};

/// Identity of a host object seen from native code: the host's id for it and the native type it
/// is wrapped in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct HostKey {
    id: u64,
    type_id: TypeId,
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKey({})", self.id)
    }
}

type ErasedHandle = Handle<dyn Any + Send + Sync>;

/// Native proxies back to the host objects they wrap, so a proxy passed back to the host unwraps
/// to the original object instead of being proxied again.
struct ReverseMap<H: HostRuntime> {
    by_block: HashMap<usize, (ProxyToken, H::Weak)>,
    blocks: HashMap<ProxyToken, usize>,
}

struct Inner<H: HostRuntime> {
    cache: ProxyCache<HostKey, WeakHandle<dyn Any + Send + Sync>>,
    reverse: Mutex<ReverseMap<H>>,
}

impl<H: HostRuntime> Inner<H> {
    fn evict(&self, key: &HostKey, token: ProxyToken) {
        self.cache.finalize(key, token);

        let removed = {
            let mut reverse = self.reverse.lock();
            match reverse.blocks.remove(&token) {
                Some(block) => match reverse.by_block.get(&block) {
                    Some((owner, _)) if *owner == token => reverse.by_block.remove(&block),
                    _ => None,
                },
                None => None,
            }
        };
        drop(removed);
    }
}

/// Host objects wrapped for native code.
///
/// Each proxy holds a strong reference to its host object, which keeps it from being collected
/// while native code uses the proxy. Dropping the last native handle to the proxy evicts it from
/// the cache.
pub struct HostToNative<H: HostRuntime> {
    inner: Arc<Inner<H>>,
}

impl<H: HostRuntime> HostToNative<H> {
    pub fn new(prune_threshold: usize) -> HostToNative<H> {
        HostToNative {
            inner: Arc::new(Inner {
                cache: ProxyCache::new("host_to_native", prune_threshold),
                reverse: Mutex::new(ReverseMap {
                    by_block: HashMap::new(),
                    blocks: HashMap::new(),
                }),
            }),
        }
    }

    /// The native proxy of type `P` for `object`, created with `create` on first use.
    ///
    /// `create` runs under the cache lock and must not cross the boundary itself. A proxy that
    /// does not keep the `HostProxy` it is given is still cached, but cannot be unwrapped back to
    /// `object`.
    pub fn get_or_create<P>(
        &self,
        host: &H,
        object: &H::Object,
        create: impl FnOnce(HostProxy<H>) -> P,
    ) -> Handle<P>
    where
        P: Send + Sync + 'static,
    {
        let key = HostKey {
            id: host.object_id(object),
            type_id: TypeId::of::<P>(),
        };

        let mut created = None;
        let erased = self.inner.cache.get_or_create::<Infallible>(key, |token| {
            let armed = Arc::new(AtomicU8::new(PENDING));
            let proxy = HostProxy {
                object: object.clone(),
                eviction: Eviction {
                    inner: Arc::downgrade(&self.inner),
                    key,
                    token,
                    armed: armed.clone(),
                },
            };
            let handle = Handle::new(create(proxy));

            if armed.load(Ordering::Acquire) == PENDING {
                let mut reverse = self.inner.reverse.lock();
                reverse
                    .by_block
                    .insert(handle.block_id(), (token, host.downgrade(object)));
                reverse.blocks.insert(token, handle.block_id());
            }
            created = Some(armed);

            let erased: ErasedHandle = handle.into_cast(|value| value as &(dyn Any + Send + Sync));
            let weak = erased.downgrade();
            Ok((erased, weak))
        });

        // The entry is cached now, so dropping the proxy may evict it
        if let Some(armed) = created {
            let _ = armed.compare_exchange(PENDING, ARMED, Ordering::AcqRel, Ordering::Acquire);
        }

        match erased {
            Ok(erased) => match erased.downcast::<P>() {
                Ok(proxy) => proxy,
                Err(_) => unreachable!("proxy type is part of the cache key"),
            },
            Err(never) => match never {},
        }
    }

    /// The host object behind the native proxy owning control block `block_id`.
    pub fn host_object_for_block(&self, block_id: usize) -> Option<H::Object> {
        let reverse = self.inner.reverse.lock();
        let (_, weak) = reverse.by_block.get(&block_id)?;
        weak.upgrade()
    }

    /// The live proxy of type `P` for `object`, without creating one.
    pub fn lookup<P: Send + Sync + 'static>(
        &self,
        host: &H,
        object: &H::Object,
    ) -> Option<Handle<P>> {
        let key = HostKey {
            id: host.object_id(object),
            type_id: TypeId::of::<P>(),
        };
        self.inner.cache.lookup(&key)?.downcast::<P>().ok()
    }

    pub fn len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cache.is_empty()
    }

    #[cfg(feature = "proxy_stats")]
    pub fn stats(&self) -> super::ProxyStatsSnapshot {
        self.inner.cache.stats()
    }
}

/// The proxy is still being created under the cache lock
const PENDING: u8 = 0;
/// The proxy is cached and evicts its entry when dropped
const ARMED: u8 = 1;
/// Dropped before it was cached
const DETACHED: u8 = 2;

struct Eviction<H: HostRuntime> {
    inner: Weak<Inner<H>>,
    key: HostKey,
    token: ProxyToken,
    armed: Arc<AtomicU8>,
}

impl<H: HostRuntime> Drop for Eviction<H> {
    fn drop(&mut self) {
        if self
            .armed
            .compare_exchange(PENDING, DETACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Dropped inside `create`, while the cache lock is held
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.evict(&self.key, self.token);
        }
    }
}

/// The part of a native proxy that refers to its host object. Embed it in the proxy type.
pub struct HostProxy<H: HostRuntime> {
    object: H::Object,
    eviction: Eviction<H>,
}

impl<H: HostRuntime> HostProxy<H> {
    #[inline]
    pub fn object(&self) -> &H::Object {
        &self.object
    }

    #[inline]
    pub fn token(&self) -> ProxyToken {
        self.eviction.token
    }
}

impl<H: HostRuntime> fmt::Debug for HostProxy<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProxy")
            .field("key", &self.eviction.key)
            .field("token", &self.eviction.token)
            .finish()
    }
}
