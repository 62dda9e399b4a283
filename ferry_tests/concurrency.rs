//! Races between threads sharing handles, proxies and pending operations.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use ferry::{
    host::script::ScriptHost, keep_alive, AsyncBridge, BridgeError, BridgeOptions, BridgeSession,
    Handle, NativeException,
};
use ferry_tests::{init_logging, DropCounter};
use rand::Rng;

const THREADS: usize = 8;

#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
struct Cancelled;

#[test]
fn weak_upgrades_race_final_release() {
    init_logging();
    for _ in 0..200 {
        let drops = DropCounter::default();
        let handle = Handle::new(drops.token());
        let weak = handle.downgrade();
        let barrier = Barrier::new(THREADS + 1);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                let weak = weak.clone();
                let barrier = &barrier;
                let drops = &drops;
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        match weak.upgrade() {
                            Some(_strong) => assert_eq!(drops.get(), 0),
                            None => break,
                        }
                    }
                });
            }
            barrier.wait();
            drop(handle);
        });

        assert_eq!(drops.get(), 1);
        assert!(weak.upgrade().is_none());
    }
}

#[test]
fn random_clones_and_drops_release_once() {
    init_logging();
    let drops = DropCounter::default();
    let handle = Handle::new(drops.token());

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let mut local = vec![handle.clone()];
            scope.spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..2_000 {
                    match rng.random_range(0..3) {
                        0 => {
                            let index = rng.random_range(0..local.len());
                            local.push(local[index].clone());
                        }
                        1 if local.len() > 1 => {
                            let index = rng.random_range(0..local.len());
                            local.swap_remove(index);
                        }
                        _ => {
                            let index = rng.random_range(0..local.len());
                            let weak = local[index].downgrade();
                            assert!(weak.upgrade().is_some());
                        }
                    }
                }
            });
        }
    });

    assert_eq!(drops.get(), 0);
    drop(handle);
    assert_eq!(drops.get(), 1);
}

#[test]
fn concurrent_keep_alive_never_forms_cycles() {
    init_logging();
    const NODES: usize = 6;
    let drops = DropCounter::default();
    let nodes: Vec<_> = (0..NODES).map(|_| Handle::new(drops.token())).collect();
    let attached = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let nodes = &nodes;
            let attached = &attached;
            scope.spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..100 {
                    let nurse = rng.random_range(0..NODES);
                    let patient = rng.random_range(0..NODES);
                    match keep_alive(&nodes[nurse], &nodes[patient]) {
                        Ok(()) => {
                            attached.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(BridgeError::KeepAliveCycle { .. }) => {}
                        Err(other) => panic!("unexpected error {other}"),
                    }
                }
            });
        }
    });

    assert!(attached.load(Ordering::Relaxed) > 0);
    drop(nodes);
    // A cycle would leak its members
    assert_eq!(drops.get(), NODES);
}

#[test]
fn pending_operations_complete_exactly_once() {
    init_logging();
    let bridge = AsyncBridge::new();

    for _ in 0..100 {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let operation = bridge.begin::<usize>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let id = operation.id();

        let successes = AtomicUsize::new(0);
        thread::scope(|scope| {
            for thread in 0..THREADS {
                let bridge = &bridge;
                let operation = &operation;
                let successes = &successes;
                scope.spawn(move || {
                    let result = match thread % 3 {
                        0 => operation.resolve(thread),
                        1 => operation.reject(NativeException::new(Cancelled)),
                        _ => bridge.resolve(id, thread),
                    };
                    match result {
                        Ok(()) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(BridgeError::AlreadyCompleted { .. })
                        | Err(BridgeError::OperationNotPending { .. }) => {}
                        Err(other) => panic!("unexpected error {other}"),
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!operation.is_pending());
        assert!(!bridge.is_pending(id));
    }
    assert_eq!(bridge.pending_len(), 0);
}

#[test]
fn one_host_proxy_per_native_across_threads() {
    init_logging();
    let session = BridgeSession::new(ScriptHost::new(), BridgeOptions::default());
    let native = Handle::new(String::from("contended"));

    let objects: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let session = session.clone();
                let native = native.clone();
                scope.spawn(move || session.to_host(&native).unwrap())
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert!(objects.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(session.native_to_host().held_count(), 1);

    drop(objects);
    session.host().collect_and_finalize();
    assert_eq!(session.native_to_host().held_count(), 0);
    assert_eq!(native.strong_count(), 1);
}

#[test]
fn finalization_races_proxy_creation() {
    init_logging();
    let session = BridgeSession::new(ScriptHost::new(), BridgeOptions::default());
    let native = Handle::new(7u64);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let collector = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                session.host().collect_and_finalize();
                thread::yield_now();
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let object = session.to_host(&native).unwrap();
                        let back = session.native_of::<u64>(&object).unwrap();
                        assert!(back.ptr_eq(&native));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        done.store(true, Ordering::Release);
        collector.join().unwrap();
    });

    session.host().collect_and_finalize();
    assert_eq!(session.native_to_host().held_count(), 0);
    assert!(session.native_to_host().lookup(&native).is_none());
    assert_eq!(native.strong_count(), 1);
}
