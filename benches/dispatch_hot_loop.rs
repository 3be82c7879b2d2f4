use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::{Duration, Instant};

use relayrt::prelude::{
    Connector, Endpoint, Event, ExhaustedAction, Lifecycle, MemoryTransport, ThreadingProfile,
};

fn started_connector(threads: usize) -> Connector<MemoryTransport> {
    let profile = ThreadingProfile::default()
        .with_max_threads_active(threads)
        .with_max_buffer_size(1024)
        .with_exhausted_action(ExhaustedAction::Wait);
    let connector =
        Connector::new(MemoryTransport::default()).with_dispatcher_threading_profile(profile);
    connector.initialise().unwrap();
    connector.start().unwrap();
    connector
}

/// One-way sends through the dispatcher executor, drained by `stop`.
fn run_one_way(threads: usize, total: u64) -> Duration {
    let connector = started_connector(threads);
    let endpoint = Endpoint::new("memory", "bench");

    let start = Instant::now();
    for i in 0..total {
        let _ = black_box(connector.dispatch(&endpoint, Event::new(i.to_le_bytes().to_vec())));
    }
    connector.stop().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(connector.transport().stats().dispatched() as u64, total);
    elapsed
}

/// Request-response sends served on the caller thread through the pool.
fn run_request_response(total: u64) -> Duration {
    let connector = started_connector(1);
    let endpoint = Endpoint::new("memory", "bench").request_response();

    let start = Instant::now();
    for i in 0..total {
        let _ = black_box(connector.dispatch(&endpoint, Event::new(i.to_le_bytes().to_vec())));
    }
    start.elapsed()
}

pub fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("connector_dispatch");

    for &threads in &[1_usize, 4, 16] {
        group.bench_function(BenchmarkId::new("one_way", threads), |b| {
            b.iter_custom(|n| {
                let mut total = Duration::ZERO;
                for _ in 0..n {
                    total += run_one_way(threads, 10_000);
                }
                total
            });
        });
    }

    group.bench_function(BenchmarkId::new("request_response", 1), |b| {
        b.iter_custom(|n| {
            let mut total = Duration::ZERO;
            for _ in 0..n {
                total += run_request_response(10_000);
            }
            total
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(12);
    targets = bench_dispatch
}
criterion_main!(benches);
