use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rfvast::dispatcher::classify;
use rfvast::response::{AdResponse, MediaFile};
use rfvast::scheduler::validate_midrolls;
use rfvast::{EventBus, EventKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bench: timeupdate dispatch with a typical number of session listeners
fn bench_event_dispatch(c: &mut Criterion) {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let h = Arc::clone(&hits);
        bus.on(EventKind::TimeUpdate, move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });
    }
    for kind in [EventKind::Playing, EventKind::Paused, EventKind::Ended] {
        bus.on(kind, |_| {});
    }

    c.bench_function("emit_timeupdate", |b| {
        b.iter(|| bus.emit(black_box(EventKind::TimeUpdate)))
    });

    c.bench_function("once_any_register_and_fire", |b| {
        b.iter(|| {
            bus.once_any(&[EventKind::AdStart, EventKind::AdsCancel], |_| {});
            bus.emit(black_box(EventKind::AdStart));
        })
    });
}

/// Bench: per-break decisions made on the hot path
fn bench_break_decisions(c: &mut Criterion) {
    let midrolls: Vec<f64> = (1..=50).map(|n| n as f64 * 60.0).collect();
    c.bench_function("validate_midrolls_50", |b| {
        b.iter(|| validate_midrolls(black_box(&midrolls), black_box(3600.0)))
    });

    let mut media: Vec<MediaFile> = (0..10)
        .map(|n| MediaFile::new(format!("ad_{}.mp4", n)))
        .collect();
    media.push(MediaFile::new("unit.js").with_api_framework("VPAID"));
    let response = AdResponse::with_media(media);
    c.bench_function("classify_response", |b| b.iter(|| classify(black_box(&response))));
}

criterion_group!(benches, bench_event_dispatch, bench_break_decisions);
criterion_main!(benches);
