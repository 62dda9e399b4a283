use super::*;

#[test]
fn constructions() {
    let owned = DataRef::from_vec(vec![1, 2, 3]);
    assert_eq!(owned.as_slice(), &[1, 2, 3]);

    let text = DataRef::from(String::from("hi"));
    assert_eq!(&*text, b"hi");

    let zeroed = DataRef::zeroed(4);
    assert_eq!(zeroed.as_slice(), &[0; 4]);

    let built = DataRef::build(3, |bytes| {
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = i as u8 * 2;
        }
    });
    assert_eq!(built.as_slice(), &[0, 2, 4]);

    let source = [9u8, 8];
    let copied = DataRef::copy_from(&source);
    assert_ne!(copied.as_ptr(), source.as_ptr());
    assert_eq!(copied, DataRef::from_vec(vec![9, 8]));
}

#[test]
fn from_vec_does_not_copy() {
    let bytes = vec![5u8; 16];
    let ptr = bytes.as_ptr();
    let data = DataRef::from_vec(bytes);
    assert_eq!(data.as_ptr(), ptr);
}

#[test]
fn clones_share_bytes() {
    let data = DataRef::zeroed(8);
    let copy = data.clone();
    assert!(data.ptr_eq(&copy));
    assert_eq!(data.handle().strong_count(), 2);

    drop(data);
    assert_eq!(copy.handle().strong_count(), 1);
}

#[test]
fn aliases() {
    static BYTES: [u8; 3] = [7, 7, 7];
    let data = DataRef::from_static(&BYTES);
    assert_eq!(data.as_ptr(), BYTES.as_ptr());

    let local = [1u8, 2];
    let alias = unsafe { DataRef::from_raw_parts(local.as_ptr(), local.len()) }.unwrap();
    assert_eq!(alias.as_slice(), &[1, 2]);
    drop(alias);
    assert_eq!(local, [1, 2]);

    let null = unsafe { DataRef::from_raw_parts(std::ptr::null(), 4) };
    assert!(matches!(null, Err(BridgeError::NullHandle { .. })));
}

#[test]
fn expose_by_memory_model() {
    let data = DataRef::from_vec(vec![1, 2]);

    match data.expose(MemoryModel::SharedAddressSpace) {
        Exposed::View(view) => assert!(view.ptr_eq(&data)),
        other => panic!("expected a view, got {:?}", other),
    }
    assert_eq!(data.expose(MemoryModel::Sandboxed), Exposed::Copy(vec![1, 2]));
}

#[test]
fn stale_views_are_rejected() {
    let memory = LinearMemory::new(8);
    let mut view = memory.base_view();
    memory.write(&view, 0, &[1, 2, 3]).unwrap();

    assert_eq!(memory.grow(8), 8);
    assert_eq!(memory.size(), 16);
    assert_eq!(
        memory.read(&view, 0, 3),
        Err(BridgeError::StaleView {
            view_epoch: 0,
            current_epoch: 1,
        })
    );

    memory.refresh(&mut view);
    assert_eq!(view.epoch(), 1);
    assert_eq!(memory.read(&view, 0, 3).unwrap(), vec![1, 2, 3]);
}

#[test]
fn bounds() {
    let memory = LinearMemory::new(4);
    let view = memory.base_view();
    assert_eq!(
        memory.read(&view, 2, 4),
        Err(BridgeError::OutOfBounds {
            offset: 2,
            end: 6,
            len: 4,
        })
    );
    assert!(memory.write(&view, usize::MAX, &[1]).is_err());
}

#[test]
fn store_grows_and_invalidates() {
    let memory = LinearMemory::new(4);
    let view = memory.base_view();

    let first = memory.store(&DataRef::from_vec(vec![1, 2, 3]));
    assert_eq!(first, Region { offset: 0, len: 3 });
    assert_eq!(memory.epoch(), 0);

    let second = memory.store(&DataRef::from_vec(vec![4, 5, 6]));
    assert_eq!(second, Region { offset: 3, len: 3 });
    assert_eq!(memory.epoch(), 1);
    assert!(memory.load(&view, first).is_err());

    let view = memory.base_view();
    assert_eq!(memory.load(&view, first).unwrap().as_slice(), &[1, 2, 3]);
    assert_eq!(memory.load(&view, second).unwrap().as_slice(), &[4, 5, 6]);
}
