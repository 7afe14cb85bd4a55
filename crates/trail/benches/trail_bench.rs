//! Benchmarks for Alopex Trail components.
//!
//! Run with: cargo bench --package alopex-trail
//!
//! ## Benchmark Categories
//!
//! - **Trail Encoding**: Packed vs raw block encode/decode
//! - **Builder**: Add and finalize
//! - **Scan**: Unfiltered and filtered cursor scans
//! - **Items**: Item packing

use alopex_trail::store::encoding::{EncodedTrail, EventDecoder, ItemEncoding, TimestampEncoding};
use alopex_trail::{
    BuilderConfig, CompressionType, Event, FilterSpec, Item, SyncMode, TrailBuilder, TrailStore,
    TrailUuid,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

const ACTIONS: [&str; 4] = ["view", "click", "scroll", "buy"];
const PAGES: [&str; 6] = ["home", "cart", "search", "item", "help", "checkout"];

/// Generate a clickstream-like trail: regular timestamps, few distinct values.
fn generate_trail(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| Event {
            timestamp: 1_500_000_000 + (i as u64) * 30,
            items: vec![
                Item::new(1, (i % ACTIONS.len()) as u64 + 1),
                Item::new(2, (i / 10 % PAGES.len()) as u64 + 1),
            ],
        })
        .collect()
}

fn build_store(dir: &TempDir, users: u8, events_per_user: usize) -> TrailStore {
    let config = BuilderConfig::default().with_sync_mode(SyncMode::None);
    let mut builder =
        TrailBuilder::open_with_config(dir.path().join("bench.trail"), &["action", "page"], config)
            .unwrap();
    for user in 0..users {
        let uuid = TrailUuid::from_bytes([user; 16]);
        for i in 0..events_per_user {
            let values = [ACTIONS[i % ACTIONS.len()], PAGES[i / 10 % PAGES.len()]];
            builder
                .add_uuid(uuid, 1_500_000_000 + (i as u64) * 30, &values)
                .unwrap();
        }
    }
    builder.finalize().unwrap()
}

fn bench_trail_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("trail_encode");

    for size in [100, 1_000, 10_000].iter() {
        let events = generate_trail(*size);
        group.throughput(Throughput::Elements(*size as u64));
        for (name, ts, items) in [
            ("packed", TimestampEncoding::DeltaOfDelta, ItemEncoding::Edge),
            ("raw", TimestampEncoding::Raw, ItemEncoding::Raw),
        ] {
            group.bench_with_input(BenchmarkId::new(name, size), &events, |b, events| {
                b.iter(|| EncodedTrail::encode(black_box(events), ts, items, 2))
            });
        }
    }

    group.finish();
}

fn bench_trail_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("trail_decode");

    for size in [100, 1_000, 10_000].iter() {
        let events = generate_trail(*size);
        let encoded =
            EncodedTrail::encode(&events, TimestampEncoding::DeltaOfDelta, ItemEncoding::Edge, 2);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = EventDecoder::new(encoded.clone(), *size as u64, 2);
                let mut n = 0;
                while decoder.next_event().unwrap().is_some() {
                    n += 1;
                }
                n
            })
        });
    }

    group.finish();
}

fn bench_compression_ratio(c: &mut Criterion) {
    let events = generate_trail(10_000);
    let packed =
        EncodedTrail::encode(&events, TimestampEncoding::DeltaOfDelta, ItemEncoding::Edge, 2);
    let raw = EncodedTrail::encode(&events, TimestampEncoding::Raw, ItemEncoding::Raw, 2);

    let packed_size = packed.ts_data.len() + packed.item_data.len();
    let raw_size = raw.ts_data.len() + raw.item_data.len();
    println!(
        "\nTrail encoding (10k events): packed {} bytes, raw {} bytes, ratio {:.2}x",
        packed_size,
        raw_size,
        raw_size as f64 / packed_size as f64
    );

    c.bench_function("compression_ratio_10k", |b| {
        b.iter(|| {
            EncodedTrail::encode(
                black_box(&events),
                TimestampEncoding::DeltaOfDelta,
                ItemEncoding::Edge,
                2,
            )
        })
    });
}

fn bench_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("builder_finalize");

    for compression in [CompressionType::Packed, CompressionType::Raw] {
        let name = match compression {
            CompressionType::Packed => "packed",
            CompressionType::Raw => "raw",
        };
        group.throughput(Throughput::Elements(100 * 100));
        group.bench_function(BenchmarkId::new("100x100", name), |b| {
            b.iter_batched(
                TempDir::new,
                |temp_dir| {
                    let temp_dir = temp_dir.unwrap();
                    let config = BuilderConfig::default()
                        .with_compression(compression)
                        .with_sync_mode(SyncMode::None);
                    let mut builder = TrailBuilder::open_with_config(
                        temp_dir.path().join("b.trail"),
                        &["action", "page"],
                        config,
                    )
                    .unwrap();
                    for user in 0..100u8 {
                        let uuid = TrailUuid::from_bytes([user; 16]);
                        for i in 0..100usize {
                            builder
                                .add_uuid(
                                    uuid,
                                    i as u64,
                                    &[ACTIONS[i % ACTIONS.len()], PAGES[i % PAGES.len()]],
                                )
                                .unwrap();
                        }
                    }
                    builder.close().unwrap();
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = build_store(&temp_dir, 100, 1_000);
    let filter = Arc::new(
        store
            .compile_filter(&[
                FilterSpec::new("action", "buy"),
                FilterSpec::new("page", "checkout").and(),
            ])
            .unwrap(),
    );

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(store.num_events()));

    group.bench_function("full_100k", |b| {
        b.iter(|| {
            let mut cursor = store.cursor();
            let mut n = 0u64;
            for ordinal in store.trail_ordinals() {
                cursor.bind(ordinal).unwrap();
                while cursor.next_event().unwrap().is_some() {
                    n += 1;
                }
            }
            n
        })
    });

    group.bench_function("filtered_100k", |b| {
        b.iter(|| {
            let mut cursor = store.cursor();
            cursor.set_filter(Arc::clone(&filter)).unwrap();
            let mut n = 0u64;
            for ordinal in store.trail_ordinals() {
                cursor.bind(ordinal).unwrap();
                while cursor.next_event().unwrap().is_some() {
                    n += 1;
                }
            }
            n
        })
    });

    group.finish();
}

fn bench_item_codec(c: &mut Criterion) {
    c.bench_function("item_pack_unpack", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for field in [1u32, 100, 200, 5_000] {
                for value in [0u64, 1, 1 << 20, 1 << 30] {
                    let item = Item::new(black_box(field), black_box(value));
                    let (f, v) = item.decode();
                    acc = acc.wrapping_add(f as u64 ^ v);
                }
            }
            acc
        })
    });
}

criterion_group!(
    benches,
    // Trail encoding
    bench_trail_encode,
    bench_trail_decode,
    bench_compression_ratio,
    // Builder
    bench_builder,
    // Scan
    bench_scan,
    // Items
    bench_item_codec,
);
criterion_main!(benches);
