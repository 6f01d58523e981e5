//! Benchmarks for entry acceptance and capture

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use tracewire::config::{CapturePolicy, RecordingConfig};
use tracewire::intercept::capture::capture_body;
use tracewire::model::{ControlIdentity, Entry, InteractionAction, InteractionPayload};
use tracewire::recording::Coordinator;
use tracewire::transport::TransportMessage;

fn click(i: usize) -> Entry {
    Entry::interaction(InteractionPayload {
        action: InteractionAction::Click,
        control: ControlIdentity {
            id: format!("button_{i}"),
            ..Default::default()
        },
        before_value: None,
        after_value: None,
        window: None,
    })
}

fn bench_add_entry(c: &mut Criterion) {
    let coordinator = Coordinator::new(RecordingConfig::default()).unwrap();
    coordinator.start(Some("bench"), None);
    let _subscription = coordinator.subscribe_entries(|entry: &Arc<Entry>| {
        black_box(entry.sequence_number);
    });

    c.bench_function("add_entry_single_thread", |b| {
        b.iter(|| coordinator.add_entry(black_box(click(0))).unwrap());
    });
}

fn bench_add_entry_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_entry_contended");

    for threads in [2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let coordinator = Coordinator::new(RecordingConfig::default()).unwrap();
                    coordinator.start(None, None);

                    std::thread::scope(|scope| {
                        for _ in 0..threads {
                            scope.spawn(|| {
                                for i in 0..250 {
                                    coordinator.add_entry(click(i)).unwrap();
                                }
                            });
                        }
                    });

                    black_box(coordinator.entry_count());
                });
            },
        );
    }

    group.finish();
}

fn bench_capture_body(c: &mut Criterion) {
    let policy = CapturePolicy::new(RecordingConfig::default()).unwrap();
    let mut group = c.benchmark_group("capture_body");

    for size in [100, 1_000, 10_000] {
        let body = format!(
            r#"{{"password":"hunter2","data":"{}"}}"#,
            "x".repeat(size)
        );
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| capture_body(black_box(body.as_bytes()), None, &policy));
        });
    }

    group.finish();
}

fn bench_encode_event(c: &mut Criterion) {
    let message = TransportMessage::event(click(1).with_correlation("bench-0001"));

    c.bench_function("encode_event_line", |b| {
        b.iter(|| black_box(&message).encode_line().unwrap());
    });
}

criterion_group!(
    benches,
    bench_add_entry,
    bench_add_entry_contended,
    bench_capture_body,
    bench_encode_event
);
criterion_main!(benches);
