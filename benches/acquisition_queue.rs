//! Criterion benchmarks for the acquisition hot paths.
//!
//! The sampler has one period (10 ms on the device) to fetch, stamp and enqueue a
//! sample; the consumer must keep up by encoding and appending each one. These
//! benchmarks establish baselines for both halves.
//!
//! Key metrics:
//! - Push/pop round trip on an uncontended queue
//! - Producer/consumer throughput across tasks
//! - Sample encoding and in-memory append
//!
//! Run with: cargo bench --bench acquisition_queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mocap_recorder::data::{
    AcquisitionQueue, MemoryMedium, PersistentLog, Sample, SensorValue, StreamNames, SAMPLE_SIZE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn sample(timestamp_ms: u32) -> Sample {
    Sample {
        timestamp_ms,
        accel: [
            SensorValue::new(0, 125_000),
            SensorValue::new(-1, -500_000),
            SensorValue::new(9, 806_650),
        ],
        gyro: [
            SensorValue::new(0, 1_000),
            SensorValue::new(0, -2_000),
            SensorValue::new(1, 500_000),
        ],
    }
}

/// Single-task push followed by pop, for the device queue size and larger ones.
fn queue_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_round_trip");

    for capacity in [10usize, 64, 1024] {
        let queue = AcquisitionQueue::new(capacity);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("try_push_try_pop", capacity),
            &capacity,
            |b, _| {
                b.iter(|| {
                    queue.try_push(black_box(sample(1))).unwrap();
                    let delivery = queue.try_pop().unwrap();
                    black_box(delivery.timestamp_ms);
                });
            },
        );
    }

    group.finish();
}

/// A producer task and a consumer task moving a batch through the queue.
fn queue_cross_task(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_cross_task");
    let batch = 1_000u32;
    group.throughput(Throughput::Elements(u64::from(batch)));

    for capacity in [10usize, 128] {
        group.bench_with_input(BenchmarkId::new("batch", capacity), &capacity, |b, &cap| {
            b.to_async(&runtime).iter(|| async move {
                let queue = AcquisitionQueue::new(cap);
                let consumer = {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move {
                        for _ in 0..batch {
                            let delivery = queue.pop(None).await.unwrap();
                            black_box(delivery.timestamp_ms);
                        }
                    })
                };
                for t in 0..batch {
                    queue.push(sample(t), Duration::from_secs(1)).await.unwrap();
                }
                consumer.await.unwrap();
            });
        });
    }

    group.finish();
}

/// Encoding one sample and appending it to a volatile log.
fn encode_and_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("persist");
    group.throughput(Throughput::Bytes(SAMPLE_SIZE as u64));

    group.bench_function("encode", |b| {
        let s = sample(42);
        b.iter(|| black_box(s.encode()));
    });

    group.bench_function("encode_append", |b| {
        let log =
            PersistentLog::mount(Arc::new(MemoryMedium::new()), StreamNames::default()).unwrap();
        log.open().unwrap();
        let s = sample(42);
        b.iter(|| {
            log.append(black_box(&s.encode())).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, queue_round_trip, queue_cross_task, encode_and_append);
criterion_main!(benches);
