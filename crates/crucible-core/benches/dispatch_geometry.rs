//! Dispatch geometry and session hot-path benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use crucible_backends::{GridExtent, HostBackend, PipelineLimits};
use crucible_core::{thread_group_extent, DispatchRequest, Session, SizingPolicy};

fn benchmark_thread_group_extent(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_group_extent");
    let limits = PipelineLimits::new(1024, 32);

    let grids = [
        ("1d", GridExtent::linear(1 << 20)),
        ("2d", GridExtent::planar(4096, 4096)),
        ("3d", GridExtent::new(256, 256, 64)),
    ];

    for (name, grid) in grids {
        group.bench_with_input(BenchmarkId::new("occupancy", name), &grid, |b, &g| {
            b.iter(|| black_box(thread_group_extent(black_box(g), limits, SizingPolicy::Occupancy)));
        });
        group.bench_with_input(BenchmarkId::new("width_aligned", name), &grid, |b, &g| {
            b.iter(|| black_box(thread_group_extent(black_box(g), limits, SizingPolicy::WidthAligned)));
        });
    }

    group.finish();
}

fn benchmark_dispatch_submission(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_submission");

    let mut session = Session::with_backend(Box::new(HostBackend::new()));
    session
        .compile_source("kernel void noop(device int *data [[buffer(0)]]) {}")
        .unwrap();
    session.select_function("noop").unwrap();
    let buffer = session.allocate_buffer(4096).unwrap();

    group.bench_function("linear_one_binding", |b| {
        let request = DispatchRequest::linear(4096).bind(buffer);
        b.iter(|| {
            session.dispatch(black_box(&request)).unwrap();
            // Keep the recording backend from accumulating across iterations
            session
                .backend_mut()
                .as_any_mut()
                .downcast_mut::<HostBackend>()
                .unwrap()
                .clear_dispatches();
        });
    });

    group.finish();
}

fn benchmark_buffer_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_registry");

    group.bench_function("allocate_release_cycle", |b| {
        let mut session = Session::with_backend(Box::new(HostBackend::new()));
        b.iter(|| {
            let handle = session.allocate_buffer(black_box(1024)).unwrap();
            session.release_buffer(handle).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_thread_group_extent,
    benchmark_dispatch_submission,
    benchmark_buffer_registry
);
criterion_main!(benches);
