use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::{
    host::{HostError, HostResolvers},
    WeakProxy,
};

fn token(raw: u64) -> ProxyToken {
    ProxyToken::from_raw(raw).unwrap()
}

#[test]
fn rooted_objects_survive() {
    let host = ScriptHost::new();
    let object = host.new_object();
    host.set_field(&object, "answer", ScriptValue::Number(42.0));

    assert_eq!(host.collect(), 0);
    assert_eq!(host.get_field(&object, "answer"), ScriptValue::Number(42.0));
    assert_eq!(host.num_objects(), 1);
}

#[test]
fn unrooted_objects_are_collected() {
    let host = ScriptHost::new();
    let object = host.new_object();
    let weak = object.downgrade();
    assert!(weak.is_alive());

    drop(object);
    assert!(weak.is_alive(), "alive until a collection runs");
    assert_eq!(host.collect(), 1);
    assert!(!weak.is_alive());
    assert!(weak.upgrade().is_none());
}

#[test]
fn clones_share_one_root() {
    let host = ScriptHost::new();
    let object = host.new_object();
    let copy = object.clone();
    assert_eq!(object, copy);
    assert_eq!(host.root_count(), 1);

    drop(object);
    assert_eq!(host.collect(), 0);
    drop(copy);
    assert_eq!(host.root_count(), 0);
    assert_eq!(host.collect(), 1);
}

#[test]
fn fields_keep_objects_reachable() {
    let host = ScriptHost::new();
    let parent = host.new_object();
    let child = host.new_object();
    let child_weak = child.downgrade();

    host.set_field(&parent, "child", child.into());
    host.collect();
    assert!(child_weak.is_alive());

    let child = host.get_field(&parent, "child");
    assert_eq!(child.as_object().map(ScriptRef::id), Some(child_weak.upgrade().unwrap().id()));
    drop(child);

    assert!(host.delete_field(&parent, "child"));
    host.collect();
    assert!(!child_weak.is_alive());
}

#[test]
fn cycles_are_collected() {
    let host = ScriptHost::new();
    let a = host.new_object();
    let b = host.new_object();
    host.set_field(&a, "other", b.clone().into());
    host.set_field(&b, "other", a.clone().into());
    drop((a, b));

    assert_eq!(host.collect(), 2);
    assert_eq!(host.num_objects(), 0);
}

#[test]
fn upgrade_roots_the_object() {
    let host = ScriptHost::new();
    let object = host.new_object();
    let weak = object.downgrade();
    drop(object);

    let revived = weak.upgrade().unwrap();
    assert_eq!(host.collect(), 0);
    drop(revived);
    assert_eq!(host.collect(), 1);
}

#[test]
fn finalizers_run_only_when_asked() {
    let host = ScriptHost::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    host.install_finalizer(Box::new(move |token| sink.lock().push(token)));

    let proxy = host.new_native_proxy(token(7));
    assert_eq!(host.native_token(&proxy), Some(token(7)));
    assert_eq!(host.finalization_registrations(), 1);
    drop(proxy);

    host.collect();
    assert!(seen.lock().is_empty());
    assert_eq!(host.pending_finalizers(), 1);

    assert_eq!(host.run_finalizers(), 1);
    assert_eq!(*seen.lock(), vec![token(7)]);
    assert_eq!(host.run_finalizers(), 0);
}

#[test]
fn finalizers_wait_for_a_hook() {
    let host = ScriptHost::new();
    drop(host.new_native_proxy(token(1)));
    host.collect();
    assert_eq!(host.run_finalizers(), 0);
    assert_eq!(host.pending_finalizers(), 1);

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    host.install_finalizer(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(host.run_finalizers(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn plain_objects_have_no_token() {
    let host = ScriptHost::new();
    let object = host.new_object();
    assert_eq!(host.native_token(&object), None);
    assert_eq!(host.finalization_registrations(), 0);
}

#[test]
fn methods() {
    let host = ScriptHost::new();
    let object = host.new_object();
    host.set_field(&object, "base", ScriptValue::Number(10.0));
    host.define_method(
        &object,
        "add",
        Arc::new(|host: &ScriptHost, this: &ScriptRef, args: &[ScriptValue]| {
            let base = host.get_field(this, "base").as_number().unwrap_or(0.0);
            let arg = args.first().and_then(ScriptValue::as_number).unwrap_or(0.0);
            Ok::<_, ScriptError>(ScriptValue::Number(base + arg))
        }),
    );

    let result = host.call_method(&object, "add", &[ScriptValue::Number(5.0)]);
    assert_eq!(result, Ok(ScriptValue::Number(15.0)));

    let missing = host.call_method(&object, "sub", &[]).unwrap_err();
    assert_eq!(missing.name(), "TypeError");
    assert_eq!(missing.message(), "sub is not a function");
}

#[test]
fn promise_reactions_are_microtasks() {
    let host = ScriptHost::new();
    let (promise, resolvers) = host.new_promise();
    let seen = Arc::new(Mutex::new(None));

    let sink = seen.clone();
    host.on_settled(&promise, Box::new(move |outcome| *sink.lock() = Some(outcome)));
    assert!(promise.is_pending());

    resolvers.resolve("done".into());
    assert!(!promise.is_pending());
    assert!(seen.lock().is_none(), "reactions run as microtasks");

    assert_eq!(host.run_microtasks(), 1);
    assert_eq!(*seen.lock(), Some(Ok(ScriptValue::from("done"))));
}

#[test]
fn reacting_to_a_settled_promise() {
    let host = ScriptHost::new();
    let (promise, resolvers) = host.new_promise();
    let error = ScriptError::new("RangeError", "too far");
    resolvers.reject(error.clone());

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    host.on_settled(&promise, Box::new(move |outcome| *sink.lock() = Some(outcome)));
    assert_eq!(host.pending_microtasks(), 1);
    host.run_microtasks();

    let outcome = seen.lock().take();
    match outcome {
        Some(Err(rejected)) => assert!(rejected.ptr_eq(&error)),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn errors_carry_tokens() {
    let host = ScriptHost::new();
    let error = host.new_error("NativeError", "native: boom", Some(ExceptionToken::from_raw(3)));
    assert_eq!(HostError::native_token(&error), Some(ExceptionToken::from_raw(3)));
    assert_eq!(error.to_string(), "NativeError: native: boom");

    let plain = ScriptError::new("Error", "x");
    assert_eq!(HostError::native_token(&plain), None);
    assert_ne!(plain, ScriptError::new("Error", "x"));
}

#[test]
fn automatic_collection() {
    let host = ScriptHost::new();
    let keep = host.new_object();
    for _ in 0..2000 {
        drop(host.new_object());
    }
    assert!(host.num_objects() < 2000);
    assert!(host.get_field(&keep, "x") == ScriptValue::Undefined);
}
