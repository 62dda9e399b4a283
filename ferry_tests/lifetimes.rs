//! Release and keep-alive properties of handles.

use ferry::{
    keep_alive,
    policy::{invoke, Automatic, ByValue, Copy as CopyPolicy, Discard, Disconnect, Move, Take},
    BridgeError, Handle, WeakHandle,
};
use ferry_tests::{init_logging, DropLog, Tracked};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Op {
    Clone(usize),
    Drop(usize),
    Downgrade(usize),
    Upgrade(usize),
    Cast(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..8usize).prop_map(Op::Clone),
        (0..8usize).prop_map(Op::Drop),
        (0..8usize).prop_map(Op::Downgrade),
        (0..8usize).prop_map(Op::Upgrade),
        (0..8usize).prop_map(Op::Cast),
    ]
}

proptest! {
    #[test]
    fn value_released_exactly_once(ops in prop::collection::vec(op(), 0..64)) {
        init_logging();
        let log = DropLog::new();
        let mut strong = vec![Handle::new(log.track(1))];
        let mut ids: Vec<Handle<u32>> = Vec::new();
        let mut weak: Vec<WeakHandle<Tracked>> = Vec::new();

        for op in ops {
            let live = !strong.is_empty() || !ids.is_empty();
            prop_assert_eq!(log.count(1), usize::from(!live));

            match op {
                Op::Clone(i) if !strong.is_empty() => {
                    let copy = strong[i % strong.len()].clone();
                    strong.push(copy);
                }
                Op::Drop(i) if !strong.is_empty() => {
                    strong.swap_remove(i % strong.len());
                }
                Op::Drop(i) if !ids.is_empty() => {
                    ids.swap_remove(i % ids.len());
                }
                Op::Downgrade(i) if !strong.is_empty() => {
                    weak.push(strong[i % strong.len()].downgrade());
                }
                Op::Upgrade(i) if !weak.is_empty() => {
                    let upgraded = weak[i % weak.len()].upgrade();
                    prop_assert_eq!(upgraded.is_some(), live);
                    strong.extend(upgraded);
                }
                Op::Cast(i) if !strong.is_empty() => {
                    ids.push(strong[i % strong.len()].cast(|tracked| &tracked.id));
                }
                _ => {}
            }
        }

        drop(strong);
        drop(ids);
        prop_assert_eq!(log.count(1), 1);
        prop_assert!(weak.iter().all(|w| w.upgrade().is_none()));
    }

    #[test]
    fn patients_outlive_their_nurses(
        edges in prop::collection::vec((0..6u32, 0..6u32), 0..24),
        drop_order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        init_logging();
        let log = DropLog::new();
        let handles: Vec<_> = (0..6).map(|id| Handle::new(log.track(id))).collect();

        let mut accepted = Vec::new();
        for (nurse, patient) in edges {
            match keep_alive(&handles[nurse as usize], &handles[patient as usize]) {
                Ok(()) => accepted.push((nurse, patient)),
                Err(BridgeError::KeepAliveCycle { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        let mut handles: Vec<_> = handles.into_iter().map(Some).collect();
        for index in drop_order {
            handles[index] = None;
        }

        for id in 0..6 {
            prop_assert_eq!(log.count(id), 1);
        }
        for (nurse, patient) in accepted {
            prop_assert!(log.position(nurse) < log.position(patient));
        }
    }
}

#[test]
fn patient_is_not_released_before_nurse() {
    let log = DropLog::new();
    let nurse = Handle::new(log.track(1));
    let patient = Handle::new(log.track(2));
    let weak_patient = patient.downgrade();

    keep_alive(&nurse, &patient).unwrap();
    drop(patient);
    assert!(weak_patient.upgrade().is_some());
    assert!(log.order().is_empty());

    drop(nurse);
    assert_eq!(log.order(), vec![1, 2]);
}

#[test]
fn cycles_are_rejected() {
    let a = Handle::new(1u8);
    let b = Handle::new(2u8);
    let c = Handle::new(3u8);

    keep_alive(&a, &b).unwrap();
    keep_alive(&b, &c).unwrap();
    assert!(matches!(keep_alive(&c, &a), Err(BridgeError::KeepAliveCycle { .. })));
    assert!(matches!(keep_alive(&a, &a), Err(BridgeError::KeepAliveCycle { .. })));

    // Attaching twice is not a cycle
    keep_alive(&a, &b).unwrap();
    assert_eq!(a.control_block().unwrap().patient_count(), 1);
}

#[test]
fn long_chains_release_without_recursion() {
    let log = DropLog::new();
    let head = Handle::new(log.track(0));
    let mut tail = head.clone();
    for id in 1..100_000 {
        let next = Handle::new(log.track(id));
        keep_alive(&tail, &next).unwrap();
        tail = next;
    }
    drop(tail);

    drop(head);
    let order = log.order();
    assert_eq!(order.len(), 100_000);
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn views_share_one_release() {
    struct Pair {
        left: Tracked,
        right: Tracked,
    }

    let log = DropLog::new();
    let pair = Handle::new(Pair {
        left: log.track(1),
        right: log.track(2),
    });
    let left = pair.cast(|pair| &pair.left);
    let right = pair.cast(|pair| &pair.right);
    assert!(left.same_allocation(&right));
    assert!(!left.ptr_eq(&right));

    drop(pair);
    drop(left);
    assert!(log.order().is_empty());
    assert_eq!(right.id, 2);
    drop(right);
    assert_eq!(log.order(), vec![1, 2]);
}

#[test]
fn policies_decide_ownership() {
    let log = DropLog::new();

    let taken = invoke::<Take, _>(|| Box::new(log.track(1)));
    assert_eq!(taken.id, 1);
    drop(taken);
    assert_eq!(log.count(1), 1);

    let source = String::from("copied");
    let copied = invoke::<CopyPolicy, _>(|| &source);
    assert_eq!(*copied, "copied");
    assert_ne!(copied.as_ptr(), &source as *const String);

    let mut moved_from = vec![1, 2, 3];
    let moved = invoke::<Move, _>(|| &mut moved_from);
    assert_eq!(*moved, vec![1, 2, 3]);
    assert!(moved_from.is_empty());

    static GREETING: &str = "static";
    let aliased = invoke::<Disconnect, _>(|| &GREETING);
    assert_eq!(*aliased, "static");
    drop(aliased);
    assert_eq!(GREETING, "static");

    let temporary = invoke::<Automatic, _>(|| ByValue(log.track(2)));
    assert_eq!(log.count(2), 0);
    drop(temporary);
    assert_eq!(log.count(2), 1);

    invoke::<Discard, _>(|| log.track(3));
    assert_eq!(log.count(3), 1);
}
