//! Identity-preserving proxy caches.
//!
//! Each boundary crossing direction owns one [`ProxyCache`]. A cache maps the identity of the
//! underlying object to a weak reference to its live proxy, so an object crossing twice gets the
//! same proxy back. Entries are removed by the finalization path once the proxy is unreachable.
//!
//! Every entry carries the [`ProxyToken`] it was created with. Finalization only removes an entry
//! whose token matches, so a finalizer for an old proxy that runs late cannot evict the entry of
//! a newer proxy for the same object.

mod host_to_native;
mod native_to_host;

#[cfg(test)]
mod tests;

#[cfg(feature = "proxy_stats")]
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, hash::Hash, num::NonZeroU64};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{Handle, WeakHandle};

pub use host_to_native::{HostProxy, HostToNative};
pub use native_to_host::{NativeKey, NativeToHost};

/// Identifies one proxy instance within its cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyToken(NonZeroU64);

impl ProxyToken {
    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Option<ProxyToken> {
        NonZeroU64::new(raw).map(ProxyToken)
    }
}

impl fmt::Display for ProxyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A weak reference to a proxy.
pub trait WeakProxy: Send + Sync + 'static {
    type Strong;

    fn upgrade(&self) -> Option<Self::Strong>;

    /// Whether `upgrade` would currently succeed. Must not create or drop strong references.
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync + 'static> WeakProxy for WeakHandle<T> {
    type Strong = Handle<T>;

    #[inline]
    fn upgrade(&self) -> Option<Handle<T>> {
        WeakHandle::upgrade(self)
    }

    #[inline]
    fn is_alive(&self) -> bool {
        !self.expired()
    }
}

struct CacheEntry<W> {
    token: ProxyToken,
    proxy: W,
}

struct CacheState<K, W> {
    entries: HashMap<K, CacheEntry<W>>,
    next_token: u64,
}

pub struct ProxyCache<K, W> {
    name: &'static str,
    state: Mutex<CacheState<K, W>>,
    /// Number of entries at which a miss also prunes dead entries
    prune_threshold: usize,
    #[cfg(feature = "proxy_stats")]
    stats: ProxyStats,
}

impl<K, W> ProxyCache<K, W>
where
    K: Clone + Eq + Hash + fmt::Debug,
    W: WeakProxy,
{
    pub fn new(name: &'static str, prune_threshold: usize) -> ProxyCache<K, W> {
        ProxyCache {
            name,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_token: 1,
            }),
            prune_threshold,
            #[cfg(feature = "proxy_stats")]
            stats: ProxyStats::default(),
        }
    }

    /// Return the live proxy for `key`, or create one with `create` and cache it.
    ///
    /// `create` runs under the cache lock and receives the token of the new entry. It must not
    /// call back into this cache.
    pub fn get_or_create<E>(
        &self,
        key: K,
        create: impl FnOnce(ProxyToken) -> Result<(W::Strong, W), E>,
    ) -> Result<W::Strong, E> {
        let mut stale = Vec::new();

        let result = {
            let mut state = self.state.lock();

            if let Some(entry) = state.entries.get(&key) {
                if let Some(proxy) = entry.proxy.upgrade() {
                    #[cfg(feature = "proxy_stats")]
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        cache = self.name,
                        ?key,
                        token = %entry.token,
                        "proxy cache hit"
                    );
                    return Ok(proxy);
                }
            }

            if state.entries.len() >= self.prune_threshold {
                stale.extend(Self::take_dead(&mut state));
            }

            let token = match ProxyToken::from_raw(state.next_token) {
                Some(token) => token,
                None => unreachable!("proxy tokens start at 1"),
            };
            state.next_token += 1;

            create(token).map(|(strong, proxy)| {
                if let Some(old) = state.entries.insert(key.clone(), CacheEntry { token, proxy }) {
                    stale.push(old);
                }
                #[cfg(feature = "proxy_stats")]
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(cache = self.name, ?key, %token, "created proxy");
                strong
            })
        };

        drop(stale);
        result
    }

    /// The live proxy cached for `key`, if any.
    pub fn lookup(&self, key: &K) -> Option<W::Strong> {
        self.state.lock().entries.get(key)?.proxy.upgrade()
    }

    /// The token of the entry cached for `key`, live or not.
    pub fn token(&self, key: &K) -> Option<ProxyToken> {
        self.state.lock().entries.get(key).map(|entry| entry.token)
    }

    /// Remove the entry for `key` if it still belongs to the proxy created with `token`.
    ///
    /// Returns false if the entry is gone or was replaced by a newer proxy, which is expected
    /// when finalization runs late.
    pub fn finalize(&self, key: &K, token: ProxyToken) -> bool {
        let removed = {
            let mut state = self.state.lock();
            match state.entries.get(key) {
                Some(entry) if entry.token == token => state.entries.remove(key),
                _ => None,
            }
        };

        match removed {
            Some(_) => {
                #[cfg(feature = "proxy_stats")]
                self.stats.finalized.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(cache = self.name, ?key, %token, "finalized proxy");
                true
            }
            None => {
                tracing::trace!(cache = self.name, ?key, %token, "finalizer found no entry");
                false
            }
        }
    }

    /// Drop every entry whose proxy is no longer alive, returning how many were removed.
    pub fn prune(&self) -> usize {
        let dead = Self::take_dead(&mut self.state.lock());
        dead.len()
    }

    fn take_dead(state: &mut CacheState<K, W>) -> Vec<CacheEntry<W>> {
        let dead_keys: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.proxy.is_alive())
            .map(|(key, _)| key.clone())
            .collect();

        dead_keys
            .iter()
            .filter_map(|key| state.entries.remove(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(feature = "proxy_stats")]
    pub fn stats(&self) -> ProxyStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<K, W> fmt::Debug for ProxyCache<K, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCache")
            .field("name", &self.name)
            .field("entries", &self.state.lock().entries.len())
            .finish()
    }
}

#[cfg(feature = "proxy_stats")]
#[derive(Default)]
struct ProxyStats {
    created: AtomicU64,
    finalized: AtomicU64,
    hits: AtomicU64,
}

#[cfg(feature = "proxy_stats")]
impl ProxyStats {
    fn snapshot(&self) -> ProxyStatsSnapshot {
        ProxyStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            finalized: self.finalized.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

/// Proxy counts of one cache since it was created.
#[cfg(feature = "proxy_stats")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyStatsSnapshot {
    pub created: u64,
    pub finalized: u64,
    pub hits: u64,
}

#[cfg(feature = "proxy_stats")]
impl ProxyStatsSnapshot {
    /// Proxies created and not yet finalized
    pub fn live(&self) -> u64 {
        self.created - self.finalized
    }
}
