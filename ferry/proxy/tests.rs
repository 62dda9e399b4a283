use std::{convert::Infallible, sync::Arc};

use super::*;
use crate::host::{
    script::{ScriptError, ScriptHost, ScriptRef, ScriptValue},
    HostRuntime,
};

type Cache = ProxyCache<u32, WeakHandle<String>>;

type Created = Result<(Handle<String>, WeakHandle<String>), Infallible>;

fn create(value: &str) -> impl FnOnce(ProxyToken) -> Created + '_ {
    move |_| {
        let proxy = Handle::new(value.to_owned());
        let weak = proxy.downgrade();
        Ok((proxy, weak))
    }
}

#[test]
fn one_live_proxy_per_key() {
    let cache = Cache::new("test", 16);
    let first = cache.get_or_create(1, create("a")).unwrap();
    let second = cache.get_or_create(1, create("b")).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(*second, "a");

    let other = cache.get_or_create(2, create("c")).unwrap();
    assert!(!other.ptr_eq(&first));
    assert_eq!(cache.len(), 2);
}

#[test]
fn dead_proxy_is_replaced() {
    let cache = Cache::new("test", 16);
    let first = cache.get_or_create(1, create("a")).unwrap();
    let first_token = cache.token(&1).unwrap();
    drop(first);
    assert!(cache.lookup(&1).is_none());

    let second = cache.get_or_create(1, create("b")).unwrap();
    assert_eq!(*second, "b");
    let second_token = cache.token(&1).unwrap();
    assert_ne!(first_token, second_token);

    // A late finalizer for the first proxy leaves the new entry alone
    assert!(!cache.finalize(&1, first_token));
    assert!(cache.lookup(&1).is_some());

    assert!(cache.finalize(&1, second_token));
    assert!(cache.is_empty());
    assert!(!cache.finalize(&1, second_token));
}

#[test]
fn failed_creation_caches_nothing() {
    let cache = Cache::new("test", 16);
    let result = cache.get_or_create(1, |_| Err("refused"));
    assert_eq!(result.err(), Some("refused"));
    assert!(cache.is_empty());
}

#[test]
fn pruning() {
    let cache = Cache::new("test", 4);
    let kept: Vec<_> = (0..2)
        .map(|key| cache.get_or_create(key, create("kept")).unwrap())
        .collect();
    for key in 2..4 {
        drop(cache.get_or_create(key, create("dropped")).unwrap());
    }
    assert_eq!(cache.len(), 4);

    // At the threshold a miss prunes before inserting
    let _new = cache.get_or_create(10, create("new")).unwrap();
    assert_eq!(cache.len(), 3);

    drop(kept);
    assert_eq!(cache.prune(), 2);
    assert_eq!(cache.len(), 1);
}

#[cfg(feature = "proxy_stats")]
#[test]
fn stats() {
    let cache = Cache::new("test", 16);
    let proxy = cache.get_or_create(1, create("a")).unwrap();
    let _hit = cache.get_or_create(1, create("b")).unwrap();
    let token = cache.token(&1).unwrap();
    drop(proxy);
    drop(_hit);
    cache.finalize(&1, token);

    let stats = cache.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.finalized, 1);
    assert_eq!(stats.live(), 0);
}

#[test]
fn token_display() {
    let token = ProxyToken::from_raw(12).unwrap();
    assert_eq!(token.to_string(), "#12");
    assert!(ProxyToken::from_raw(0).is_none());
}

#[test]
fn native_to_host_identity() {
    let host = ScriptHost::new();
    let bridge = NativeToHost::<ScriptHost>::new(16);
    let native = Handle::new(5u32);

    let first = bridge.get_or_create(&host, &native).unwrap();
    let second = bridge.get_or_create(&host, &native).unwrap();
    assert_eq!(first, second);
    assert_eq!(bridge.held_count(), 1);
    assert_eq!(bridge.lookup(&native), Some(first.clone()));

    let unwrapped = bridge.unwrap::<u32>(&host, &first).unwrap();
    assert!(unwrapped.ptr_eq(&native));
    assert!(bridge.unwrap::<u32>(&host, &host.new_object()).is_none());
}

#[test]
fn interface_views_get_their_own_proxy() {
    let host = ScriptHost::new();
    let bridge = NativeToHost::<ScriptHost>::new(16);
    let native = Handle::new(String::from("text"));
    let as_debug = native.cast(|s| s as &(dyn std::fmt::Debug + Send + Sync));

    let concrete = bridge.get_or_create(&host, &native).unwrap();
    let erased = bridge.get_or_create(&host, &as_debug).unwrap();
    assert_ne!(concrete, erased);
    assert_eq!(bridge.held_count(), 2);
}

#[test]
fn late_finalizer_keeps_new_proxy() {
    let host = ScriptHost::new();
    let bridge = NativeToHost::<ScriptHost>::new(16);
    let native = Handle::new(1u8);

    let old = bridge.get_or_create(&host, &native).unwrap();
    let old_token = host.native_token(&old).unwrap();
    drop(old);
    host.collect();

    // The old proxy is dead but its finalizer has not run yet
    let new = bridge.get_or_create(&host, &native).unwrap();
    let new_token = host.native_token(&new).unwrap();
    assert_ne!(old_token, new_token);
    assert_eq!(bridge.held_count(), 2);

    assert!(bridge.finalize(old_token));
    assert_eq!(bridge.held_count(), 1);
    assert_eq!(bridge.lookup(&native), Some(new.clone()));
    assert!(!bridge.finalize(old_token));
    assert!(native.strong_count() >= 2);
}

#[test]
fn empty_handle_is_rejected() {
    let host = ScriptHost::new();
    let bridge = NativeToHost::<ScriptHost>::new(16);
    let result = bridge.get_or_create(&host, &Handle::<u8>::empty());
    assert!(matches!(result, Err(crate::BridgeError::NullHandle { .. })));
}

trait Listener: Send + Sync {
    fn notify(&self, value: f64) -> Result<f64, ScriptError>;
}

/// A native view of a script object that implements `Listener` with a method.
struct ScriptListener {
    base: HostProxy<ScriptHost>,
    host: ScriptHost,
}

impl Listener for ScriptListener {
    fn notify(&self, value: f64) -> Result<f64, ScriptError> {
        let result = self
            .host
            .call_method(self.base.object(), "notify", &[ScriptValue::Number(value)])?;
        result
            .as_number()
            .ok_or_else(|| ScriptError::type_error("notify must return a number"))
    }
}

fn listener_object(host: &ScriptHost) -> ScriptRef {
    let object = host.new_object();
    host.define_method(
        &object,
        "notify",
        Arc::new(|_: &ScriptHost, _: &ScriptRef, args: &[ScriptValue]| {
            let value = args[0].as_number().unwrap_or(0.0);
            Ok::<_, ScriptError>(ScriptValue::Number(value * 2.0))
        }),
    );
    object
}

#[test]
fn host_to_native_identity_and_calls() {
    let host = ScriptHost::new();
    let bridge = HostToNative::<ScriptHost>::new(16);
    let object = listener_object(&host);

    let make = |base: HostProxy<ScriptHost>| ScriptListener {
        base,
        host: host.clone(),
    };
    let proxy = bridge.get_or_create(&host, &object, make);
    let again = bridge.get_or_create(&host, &object, |_| -> ScriptListener { unreachable!() });
    assert!(proxy.ptr_eq(&again));
    assert_eq!(bridge.len(), 1);

    let listener: Handle<dyn Listener> = proxy.cast(|p| p as &dyn Listener);
    assert_eq!(listener.notify(4.0), Ok(8.0));

    assert_eq!(bridge.host_object_for_block(proxy.block_id()), Some(object.clone()));
    let found = bridge.lookup::<ScriptListener>(&host, &object);
    assert_eq!(found.map(|p| p.block_id()), Some(proxy.block_id()));
}

#[test]
fn native_proxy_keeps_host_object_alive() {
    let host = ScriptHost::new();
    let bridge = HostToNative::<ScriptHost>::new(16);
    let object = listener_object(&host);
    let weak = host.downgrade(&object);

    let proxy = bridge.get_or_create(&host, &object, |base| ScriptListener {
        base,
        host: host.clone(),
    });
    let block = proxy.block_id();
    drop(object);

    host.collect();
    assert!(weak.is_alive());

    drop(proxy);
    assert!(bridge.is_empty(), "releasing the proxy evicts it");
    assert!(bridge.host_object_for_block(block).is_none());

    host.collect();
    assert!(!weak.is_alive());
}

#[test]
fn proxy_without_embedded_base() {
    let host = ScriptHost::new();
    let bridge = HostToNative::<ScriptHost>::new(16);
    let object = host.new_object();

    let proxy = bridge.get_or_create(&host, &object, |_base| 5u32);
    assert_eq!(*proxy, 5);
    assert_eq!(bridge.len(), 1);
    assert!(bridge.host_object_for_block(proxy.block_id()).is_none());

    let again = bridge.get_or_create(&host, &object, |_| -> u32 { unreachable!() });
    assert!(again.ptr_eq(&proxy));

    drop((proxy, again));
    assert!(bridge.lookup::<u32>(&host, &object).is_none());
}

#[test]
fn panicking_create_leaves_cache_usable() {
    let host = ScriptHost::new();
    let bridge = HostToNative::<ScriptHost>::new(16);
    let object = host.new_object();

    let failed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        bridge.get_or_create(&host, &object, |_base| -> HostProxy<ScriptHost> {
            panic!("refused")
        })
    }));
    assert!(failed.is_err());
    assert!(bridge.is_empty());

    let proxy = bridge.get_or_create(&host, &object, |base| base);
    assert_eq!(proxy.object(), &object);
    assert_eq!(bridge.host_object_for_block(proxy.block_id()), Some(object.clone()));

    drop(proxy);
    assert!(bridge.is_empty());
}
