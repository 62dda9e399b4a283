use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    thread,
};

use parking_lot::Mutex;

use super::*;
use crate::{
    host::{
        script::{ScriptError, ScriptHost, ScriptValue},
        HostResolvers, HostRuntime,
    },
    BridgeError, ExceptionBridge,
};

#[derive(Debug, thiserror::Error)]
#[error("timed out")]
struct TimedOut;

#[derive(Default)]
struct Flag(AtomicBool);

impl Wake for Flag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn poll<T>(future: &mut NativeFuture<T>, waker: &Waker) -> Poll<Result<T, NativeException>> {
    Pin::new(future).poll(&mut Context::from_waker(waker))
}

fn exceptions() -> Arc<ExceptionBridge> {
    Arc::new(ExceptionBridge::new(16, "native: "))
}

#[test]
fn then_after_resolve() {
    let (promise, future) = NativePromise::new();
    promise.resolve(5u32);
    assert!(future.is_ready());

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.ok());
    assert_eq!(*seen.lock(), Some(5));
}

#[test]
fn then_before_resolve() {
    let (promise, future) = NativePromise::<String>::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.ok());
    assert!(seen.lock().is_none());

    promise.resolve("late".to_owned());
    assert_eq!(seen.lock().as_deref(), Some("late"));
}

#[test]
fn dropped_promise_is_broken() {
    let (promise, future) = NativePromise::<u8>::new();
    drop(promise);

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.err());

    let exception = seen.lock().take().unwrap();
    assert!(matches!(
        exception.downcast_ref::<BridgeError>(),
        Some(BridgeError::BrokenPromise)
    ));
}

#[test]
fn dropped_future_does_not_affect_producer() {
    let (promise, future) = NativePromise::<u8>::new();
    drop(future);
    promise.resolve(1);
}

#[test]
fn polling_wakes() {
    let (promise, mut future) = NativePromise::<u8>::new();
    let flag = Arc::new(Flag::default());
    let waker = Waker::from(flag.clone());

    assert!(poll(&mut future, &waker).is_pending());
    assert!(!flag.0.load(Ordering::SeqCst));

    promise.reject(NativeException::new(TimedOut));
    assert!(flag.0.load(Ordering::SeqCst));

    match poll(&mut future, &waker) {
        Poll::Ready(Err(exception)) => assert!(exception.is::<TimedOut>()),
        other => panic!("unexpected poll result {:?}", other.map(|r| r.is_ok())),
    }
}

#[test]
fn completes_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let operation = PendingAsyncOperation::new(
        OperationId(1),
        Box::new(move |_: Result<u8, NativeException>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    assert!(operation.resolve(1).is_ok());
    assert_eq!(operation.state(), OperationState::Resolved);

    let second = operation.reject(NativeException::new(TimedOut));
    assert_eq!(
        second,
        Err(BridgeError::AlreadyCompleted {
            operation: OperationId(1),
            state: OperationState::Resolved,
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn racing_completions() {
    for _ in 0..50 {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let operation = Arc::new(PendingAsyncOperation::new(
            OperationId(7),
            Box::new(move |_: Result<usize, NativeException>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let wins = AtomicUsize::new(0);
        thread::scope(|scope| {
            for i in 0..8 {
                let operation = operation.clone();
                let wins = &wins;
                scope.spawn(move || {
                    if operation.resolve(i).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!operation.is_pending());
    }
}

#[test]
fn table_tracks_pending_operations() {
    let bridge = AsyncBridge::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let first = bridge.begin::<u32>(move |outcome| sink.lock().push(outcome.ok()));
    let sink = seen.clone();
    let second = bridge.begin::<u32>(move |outcome| sink.lock().push(outcome.ok()));
    assert_eq!(bridge.pending_len(), 2);
    assert_ne!(first.id(), second.id());

    bridge.resolve(first.id(), 10u32).unwrap();
    assert!(!bridge.is_pending(first.id()));
    assert_eq!(
        bridge.resolve(first.id(), 11u32),
        Err(BridgeError::OperationNotPending {
            operation: first.id()
        })
    );

    assert_eq!(
        bridge.resolve(second.id(), "wrong"),
        Err(BridgeError::OperationTypeMismatch {
            operation: second.id()
        })
    );

    second.reject(NativeException::new(TimedOut)).unwrap();
    assert_eq!(bridge.pending_len(), 0);
    assert_eq!(*seen.lock(), vec![Some(10), None]);
}

#[test]
fn native_future_to_host_promise() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let (native, future) = NativePromise::new();

    let promise = bridge.native_to_host(&host, &exceptions(), future, |value: f64| {
        Ok(ScriptValue::Number(value))
    });
    assert!(promise.is_pending());
    assert_eq!(bridge.pending_len(), 1);

    native.resolve(2.5);
    assert_eq!(promise.outcome(), Some(Ok(ScriptValue::Number(2.5))));
    assert_eq!(bridge.pending_len(), 0);
}

#[test]
fn native_rejection_reaches_host() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let exceptions = exceptions();
    let (native, future) = NativePromise::<f64>::new();

    let promise = bridge.native_to_host(&host, &exceptions, future, |value| Ok(value.into()));
    let exception = NativeException::new(TimedOut);
    native.reject(exception.clone());

    let Some(Err(error)) = promise.outcome() else {
        panic!("promise should be rejected");
    };
    assert_eq!(error.name(), "TimedOut");
    assert_eq!(error.message(), "native: timed out");
    assert!(exceptions.from_host_error::<ScriptHost>(&error).ptr_eq(&exception));
}

#[test]
fn host_promise_to_native_future() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let (promise, resolvers) = host.new_promise();

    let future = bridge.host_to_native(&host, &exceptions(), &promise, |value| {
        value
            .as_number()
            .ok_or_else(|| NativeException::new(TimedOut))
    });

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.ok());

    resolvers.resolve(ScriptValue::Number(4.0));
    assert!(seen.lock().is_none(), "host reactions are microtasks");
    host.run_microtasks();
    assert_eq!(*seen.lock(), Some(4.0));
    assert_eq!(bridge.pending_len(), 0);
}

#[test]
fn host_rejection_reaches_native() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let (promise, resolvers) = host.new_promise();
    let future = bridge.host_to_native(&host, &exceptions(), &promise, |_| Ok(()));

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    future.then(move |outcome| *sink.lock() = outcome.err());

    let error = ScriptError::new("AbortError", "stopped");
    resolvers.reject(error.clone());
    host.run_microtasks();

    let exception = seen.lock().take().unwrap();
    let wrapped = exception.downcast_ref::<crate::HostException>().unwrap();
    assert_eq!(wrapped.original::<ScriptError>(), Some(error));
}

#[test]
fn abandoned_host_promise_breaks_native_future() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let (promise, resolvers) = host.new_promise();
    let mut future = bridge.host_to_native(&host, &exceptions(), &promise, |_| Ok(()));
    assert_eq!(bridge.pending_len(), 1);

    drop((promise, resolvers));
    host.run_microtasks();
    assert_eq!(bridge.pending_len(), 0);

    let waker = Waker::from(Arc::new(Flag::default()));
    match poll(&mut future, &waker) {
        Poll::Ready(Err(exception)) => assert!(matches!(
            exception.downcast_ref::<BridgeError>(),
            Some(BridgeError::BrokenPromise)
        )),
        other => panic!("expected a broken promise, got {:?}", other.map(|r| r.is_ok())),
    }
}

#[test]
fn settled_host_promise_completes_once() {
    let host = ScriptHost::new();
    let bridge = AsyncBridge::new();
    let (promise, resolvers) = host.new_promise();
    let future = bridge.host_to_native(&host, &exceptions(), &promise, |_| Ok(1u8));

    let seen = Arc::new(AtomicUsize::new(0));
    let sink = seen.clone();
    future.then(move |outcome| {
        assert!(outcome.is_ok());
        sink.fetch_add(1, Ordering::SeqCst);
    });

    resolvers.resolve(ScriptValue::Undefined);
    host.run_microtasks();
    drop(promise);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.pending_len(), 0);
}
