use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ferry::{
    host::script::ScriptHost,
    keep_alive,
    policy::{invoke, Automatic, ByValue},
    BridgeOptions, BridgeSession, DataRef, Handle, NativeException,
};
use parking_lot::Mutex;

#[derive(Debug)]
struct Failure;

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failure")
    }
}

impl std::error::Error for Failure {}

fn handles(c: &mut Criterion) {
    let handle = Handle::new(vec![0u8; 64]);
    c.bench_function("handle clone and drop", |b| {
        b.iter(|| drop(black_box(handle.clone())))
    });

    let weak = handle.downgrade();
    c.bench_function("weak upgrade", |b| b.iter(|| black_box(weak.upgrade())));

    c.bench_function("handle new", |b| {
        b.iter(|| black_box(invoke::<Automatic, _>(|| ByValue(42u64))))
    });

    c.bench_function("keep alive attach and release", |b| {
        b.iter_batched(
            || (Handle::new(1u32), Handle::new(2u32)),
            |(nurse, patient)| {
                let _ = keep_alive(&nurse, &patient);
                drop(patient);
                drop(nurse);
            },
            BatchSize::SmallInput,
        )
    });
}

fn proxies(c: &mut Criterion) {
    let session = BridgeSession::new(ScriptHost::new(), BridgeOptions::default());
    let native = Handle::new(Mutex::new(0u32));
    let object = session.to_host(&native).ok();

    c.bench_function("native to host cache hit", |b| {
        b.iter(|| black_box(session.to_host(&native)))
    });

    if let Some(object) = &object {
        c.bench_function("host proxy unwrap", |b| {
            b.iter(|| black_box(session.native_of::<Mutex<u32>>(object)))
        });
    }

    c.bench_function("native to host miss and finalize", |b| {
        b.iter_batched(
            || Handle::new(7u64),
            |native| {
                drop(session.to_host(&native));
                session.host().collect_and_finalize();
            },
            BatchSize::SmallInput,
        )
    });
}

fn exceptions(c: &mut Criterion) {
    let session = BridgeSession::new(ScriptHost::new(), BridgeOptions::default());
    let exception = NativeException::new(Failure);

    c.bench_function("exception round trip", |b| {
        b.iter(|| {
            let error = session.to_host_error(&exception);
            black_box(session.from_host_error(&error))
        })
    });
}

fn buffers(c: &mut Criterion) {
    let data = DataRef::zeroed(4096);
    c.bench_function("expose view", |b| {
        b.iter(|| black_box(data.expose(ferry::MemoryModel::SharedAddressSpace)))
    });
    c.bench_function("expose copy", |b| {
        b.iter(|| black_box(data.expose(ferry::MemoryModel::Sandboxed)))
    });
}

criterion_group!(benches, handles, proxies, exceptions, buffers);
criterion_main!(benches);
