use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use noticeboard_core::keys::KeyManager;
use noticeboard_core::store::{sanitize, MessageStore, MessageType, Record};
use std::sync::Arc;
use tempfile::TempDir;

const BENCH_BITS: usize = 2048;

fn open_store(dir: &TempDir) -> MessageStore {
    let keys = Arc::new(KeyManager::open(dir.path().join("keys"), BENCH_BITS).unwrap());
    MessageStore::new(dir.path().join("messages"), keys).unwrap()
}

fn populate(store: &MessageStore, count: i64) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for i in 0..count {
        store
            .save_at(
                &format!("message number {}", i),
                MessageType::Message,
                start + ChronoDuration::seconds(i),
            )
            .unwrap();
    }
}

fn bench_sanitize(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_sanitize");

    for size in [64, 4096, 102400].iter() {
        let input: String = "line of text\twith a tab\r\n".chars().cycle().take(*size).collect();
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("input_size", size), &input, |b, input| {
            b.iter(|| black_box(sanitize(black_box(input))));
        });
    }

    group.finish();
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_save");

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut offset = 0;

    group.bench_function("save_small_message", |b| {
        b.iter(|| {
            offset += 1;
            let at = start + ChronoDuration::seconds(offset);
            black_box(store.save_at("benchmark message", MessageType::Message, at).unwrap())
        });
    });

    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_list");
    group.sample_size(20);

    for count in [10, 100, 1000].iter() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        populate(&store, *count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("records", count), &store, |b, store| {
            b.iter(|| black_box(store.list()));
        });
    }

    group.finish();
}

fn bench_record_parse(c: &mut Criterion) {
    let text = format!(
        "Date: 2024-01-01T00:00:00Z\nType: message\nFingerprint: 1a2b3c4d\nSignature: {}\n\n{}",
        "ab".repeat(256),
        "content ".repeat(128)
    );

    c.bench_function("storage_record_parse", |b| {
        b.iter(|| black_box(Record::parse("20240101_000000.txt", black_box(&text)).unwrap()));
    });
}

criterion_group!(benches, bench_sanitize, bench_save, bench_list, bench_record_parse);
criterion_main!(benches);
