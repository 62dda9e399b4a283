use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::*;

static CLONES: AtomicUsize = AtomicUsize::new(0);

/// Counts clones so tests can tell a copy from a transfer. Only `copy_*` tests clone it.
#[derive(Debug, Default, PartialEq)]
struct Payload {
    items: Vec<u32>,
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        CLONES.fetch_add(1, Ordering::SeqCst);
        Payload {
            items: self.items.clone(),
        }
    }
}

fn payload(items: &[u32]) -> Payload {
    Payload {
        items: items.to_vec(),
    }
}

#[test]
fn take_transfers_ownership_without_copy() {
    let boxed = Box::new(payload(&[1, 2]));
    let addr = &*boxed as *const Payload as usize;

    let handle = invoke::<Take, _>(|| boxed);
    assert_eq!(handle.addr(), addr);
    assert_eq!(handle.items, vec![1, 2]);
    assert_eq!(handle.strong_count(), 1);
}

#[test]
fn take_adopts_shared_pointers() {
    let shared = Arc::new(7u32);
    let handle = invoke::<Take, _>(|| shared.clone());
    assert_eq!(handle.addr(), Arc::as_ptr(&shared) as usize);
    assert_eq!(Arc::strong_count(&shared), 2);

    let existing = Handle::new(3u8);
    let same = invoke::<Take, _>(|| existing.clone());
    assert!(same.ptr_eq(&existing));
}

#[test]
fn shared_getter_bound_repeatedly() {
    let shared = Arc::new(payload(&[4]));
    let getter = || shared.clone();

    let taken = invoke::<Take, _>(getter);
    let automatic = invoke::<Automatic, _>(getter);
    assert!(taken.ptr_eq(&automatic));
    assert_eq!(Arc::strong_count(&shared), 3);

    drop((taken, automatic));
    assert_eq!(Arc::strong_count(&shared), 1);
}

#[test]
fn copy_is_independent_of_source() {
    let mut source = payload(&[1]);

    let handle = invoke::<Copy, _>(|| &source);
    assert_ne!(handle.addr(), &source as *const Payload as usize);

    source.items.push(2);
    assert_eq!(handle.items, vec![1]);
    assert_eq!(source.items, vec![1, 2]);
}

#[test]
fn copy_through_pointers() {
    let before = CLONES.load(Ordering::SeqCst);

    let original = Handle::new(payload(&[4]));
    let copied = invoke::<Copy, _>(|| original.clone());
    assert!(!copied.same_allocation(&original));
    assert_eq!(copied.items, vec![4]);

    let boxed = invoke::<Copy, _>(|| Box::new(payload(&[5])));
    assert_eq!(boxed.items, vec![5]);

    assert!(CLONES.load(Ordering::SeqCst) >= before + 2);

    let empty = invoke::<Copy, _>(Handle::<Payload>::empty);
    assert!(empty.is_empty());
}

#[test]
fn move_leaves_source_default() {
    let mut source = payload(&[1, 2, 3]);

    let handle = invoke::<Move, _>(|| &mut source);
    assert_eq!(handle.items, vec![1, 2, 3]);
    assert_eq!(source, Payload::default());

    let from_box = invoke::<Move, _>(|| Box::new(payload(&[9])));
    assert_eq!(from_box.items, vec![9]);
}

#[test]
fn disconnect_does_not_own() {
    static SOURCE: u32 = 17;

    let handle = invoke::<Disconnect, _>(|| &SOURCE);
    assert_eq!(handle.addr(), &SOURCE as *const u32 as usize);
    assert_eq!(*handle, 17);
}

#[test]
fn disconnect_leaves_source_count_alone() {
    let source = Handle::new(payload(&[1]));
    let before = source.strong_count();

    let alias = invoke::<Disconnect, _>(|| unsafe { Unowned::new(&*source) });
    assert!(alias.ptr_eq(&source));
    assert!(!alias.same_allocation(&source));
    assert_eq!(source.strong_count(), before);

    drop(alias);
    assert_eq!(source.strong_count(), before);
    assert_eq!(source.items, vec![1]);
}

#[test]
fn by_value_is_value_constructed() {
    let take = invoke::<Take, _>(|| ByValue(1u8));
    let copy = invoke::<Copy, _>(|| ByValue(2u8));
    let moved = invoke::<Move, _>(|| ByValue(3u8));
    let disconnected = invoke::<Disconnect, _>(|| ByValue(4u8));
    let automatic = invoke::<Automatic, _>(|| ByValue(5u8));

    for (handle, expected) in [take, copy, moved, disconnected, automatic]
        .iter()
        .zip(1u8..)
    {
        assert_eq!(**handle, expected);
        assert_eq!(handle.strong_count(), 1);
    }
}

#[test]
fn automatic_takes_pointers_and_copies_references() {
    let boxed = Box::new(payload(&[1]));
    let addr = &*boxed as *const Payload as usize;
    let taken = invoke::<Automatic, _>(|| boxed);
    assert_eq!(taken.addr(), addr);

    let source = payload(&[2]);
    let copied = invoke::<Automatic, _>(|| &source);
    assert_ne!(copied.addr(), &source as *const Payload as usize);
    assert_eq!(copied.items, vec![2]);
}

#[test]
fn void_and_discard() {
    let calls = AtomicUsize::new(0);

    invoke::<Void, _>(|| {
        calls.fetch_add(1, Ordering::SeqCst);
    });

    let drops = Arc::new(());
    let observed = drops.clone();
    invoke::<Discard, _>(move || observed);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&drops), 1);
}

#[test]
fn policy_kinds() {
    assert_eq!(<Take as PolicyTag>::KIND, PolicyKind::Take);
    assert_eq!(<Automatic as PolicyTag>::KIND, PolicyKind::Automatic);
    assert_eq!(PolicyKind::Disconnect.to_string(), "disconnect");
}
