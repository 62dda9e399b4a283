//! Objects, exceptions and async results crossing a session in both directions.

use std::sync::Arc;

use ferry::{
    host::{
        script::{ScriptError, ScriptHost, ScriptValue},
        HostResolvers, HostRuntime,
    },
    keep_alive,
    proxy::HostProxy,
    BridgeOptions, BridgeOptionsBuilder, BridgeSession, DataRef, Handle, HostException,
    NativeException, NativePromise, WeakProxy,
};
use ferry_tests::{init_logging, DropLog};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("invalid argument: {0}")]
struct InvalidArgument(String);

fn session() -> BridgeSession<ScriptHost> {
    init_logging();
    BridgeSession::new(ScriptHost::new(), BridgeOptions::default())
}

#[test]
fn native_proxy_identity_until_finalized() {
    let session = session();
    let native = Handle::new(String::from("shared"));

    let first = session.to_host(&native).unwrap();
    assert_eq!(first, session.to_host(&native).unwrap());
    let first_id = first.id();
    drop(first);

    session.host().collect_and_finalize();
    assert_eq!(session.native_to_host().held_count(), 0);

    let second = session.to_host(&native).unwrap();
    assert_ne!(second.id(), first_id);
    assert!(session.native_of::<String>(&second).unwrap().ptr_eq(&native));
}

#[test]
fn host_releases_natives_and_their_patients() {
    let session = session();
    let log = DropLog::new();
    let nurse = Handle::new(log.track(1));
    keep_alive(&nurse, &Handle::new(log.track(2))).unwrap();

    let object = session.to_host(&nurse).unwrap();
    drop(nurse);

    // Reachable from a rooted host object
    let holder = session.host().new_object();
    session.host().set_field(&holder, "native", ScriptValue::Object(object));
    session.host().collect_and_finalize();
    assert!(log.order().is_empty());

    assert!(session.host().delete_field(&holder, "native"));
    assert_eq!(session.host().collect_and_finalize(), 1);
    assert_eq!(log.order(), vec![1, 2]);
}

#[test]
fn host_object_identity_round_trip() {
    let session = session();
    let object = session.host().new_object();
    let weak = session.host().downgrade(&object);

    let proxy = session.host_proxy(&object, |base| base);
    let view: Handle<HostProxy<ScriptHost>> = session.from_host(&object, |_| unreachable!(), |p| p);
    assert!(view.ptr_eq(&proxy));
    assert_eq!(session.to_host(&view).unwrap(), object);

    drop(object);
    session.host().collect();
    assert!(weak.is_alive(), "the native proxy keeps the object alive");

    drop((proxy, view));
    session.host().collect();
    assert!(!weak.is_alive());
    assert!(session.host_to_native().is_empty());
}

#[test]
fn byte_buffers_cross_as_native_objects() {
    let session = session();
    let data = DataRef::from_vec(vec![1, 2, 3]);

    let object = session.to_host(data.handle()).unwrap();
    let back = session.native_of::<[u8]>(&object).unwrap();
    assert_eq!(&*back, &[1, 2, 3]);
    assert!(back.same_allocation(data.handle()));
}

#[test]
fn native_exception_round_trip() {
    let session = session();
    let exception = NativeException::new(InvalidArgument(String::from("-1")));

    let error = session.to_host_error(&exception);
    assert_eq!(error.name(), "InvalidArgument");
    assert_eq!(error.message(), "native: invalid argument: -1");

    let caught = session.from_host_error(&error);
    assert!(caught.ptr_eq(&exception));
    assert_eq!(
        caught.downcast_ref::<InvalidArgument>().map(|e| e.0.as_str()),
        Some("-1")
    );
}

#[test]
fn host_error_round_trip() {
    let session = session();
    let error = ScriptError::new("RangeError", "too far");

    let exception = session.from_host_error(&error);
    let host = exception.downcast_ref::<HostException>().unwrap();
    assert_eq!(host.name, "RangeError");
    assert_eq!(host.message, "too far");

    let rethrown = session.to_host_error(&exception);
    assert!(rethrown.ptr_eq(&error));
}

#[test]
fn evicted_exceptions_degrade_to_messages() {
    init_logging();
    let options = BridgeOptionsBuilder::new().exception_capacity(1).build();
    let session = BridgeSession::new(ScriptHost::new(), options);

    let old = NativeException::new(InvalidArgument(String::from("old")));
    let old_error = session.to_host_error(&old);
    let new = NativeException::new(InvalidArgument(String::from("new")));
    let new_error = session.to_host_error(&new);

    assert!(session.from_host_error(&new_error).ptr_eq(&new));

    let degraded = session.from_host_error(&old_error);
    assert!(!degraded.ptr_eq(&old));
    let host = degraded.downcast_ref::<HostException>().unwrap();
    assert_eq!(host.name, "InvalidArgument");
    assert_eq!(host.message, "native: invalid argument: old");
}

#[test]
fn rejections_cross_with_identity() {
    let session = session();
    let exception = NativeException::new(InvalidArgument(String::from("async")));

    let (native, future) = NativePromise::<i32>::new();
    let promise = session.future_to_host(future, |n| Ok(ScriptValue::from(n as f64)));
    native.reject(exception.clone());

    session.host().run_microtasks();
    let error = match promise.outcome() {
        Some(Err(error)) => error,
        other => panic!("expected a rejection, got {:?}", other),
    };
    assert!(session.from_host_error(&error).ptr_eq(&exception));

    // And back into native code through a second crossing
    let back = session.promise_to_native(&promise, |_| Ok(0i32));
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    back.then(move |outcome| *sink.lock() = outcome.err());
    session.host().run_microtasks();

    let seen = seen.lock().take().unwrap();
    assert!(seen.ptr_eq(&exception));
    assert_eq!(session.async_bridge().pending_len(), 0);
}

#[test]
fn host_promises_resolve_native_futures() {
    let session = session();
    let (promise, resolvers) = session.host().new_promise();

    let future = session.promise_to_native(&promise, |value| {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| NativeException::new(InvalidArgument(String::from("not a string"))))
    });
    assert_eq!(session.async_bridge().pending_len(), 1);

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.ok());

    resolvers.resolve(ScriptValue::from("done"));
    assert!(seen.lock().is_none(), "reactions wait for the microtask queue");
    session.host().run_microtasks();
    assert_eq!(seen.lock().as_deref(), Some("done"));
    assert_eq!(session.async_bridge().pending_len(), 0);
}
