use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use noticeboard_core::keys::KeyManager;
use std::time::Duration;
use tempfile::TempDir;

const BENCH_BITS: usize = 2048;

fn bench_rsa_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_rsa_signing");

    let dir = TempDir::new().unwrap();
    let keys = KeyManager::open(dir.path(), BENCH_BITS).unwrap();

    // Signing cost is dominated by the private-key operation, not the digest
    for size in [32, 1024, 16384, 102400].iter() {
        let message = vec![b'a'; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("message_size", size), &message, |b, msg| {
            b.iter(|| black_box(keys.sign(black_box(msg))));
        });
    }

    group.finish();
}

fn bench_rsa_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_rsa_verification");

    let dir = TempDir::new().unwrap();
    let keys = KeyManager::open(dir.path(), BENCH_BITS).unwrap();

    for size in [32, 1024, 16384, 102400].iter() {
        let message = vec![b'a'; *size];
        let signature = keys.sign(&message);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("message_size", size), &message, |b, msg| {
            b.iter(|| black_box(keys.verify(black_box(msg), &signature)));
        });
    }

    group.bench_function("bad_signature_hex", |b| {
        b.iter(|| black_box(keys.verify(b"message", black_box("not-hex"))));
    });

    group.finish();
}

fn bench_rsa_keygen(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_rsa_keygen");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(30));

    group.bench_function("generate_2048", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            black_box(KeyManager::ensure_key_pair(dir.path(), BENCH_BITS).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_rsa_signing,
    bench_rsa_verification,
    bench_rsa_keygen
);
criterion_main!(benches);
