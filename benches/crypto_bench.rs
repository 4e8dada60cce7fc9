use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockbox::core::cipher::{
    decrypt_with, derive_key_with, encrypt_deterministic, encrypt_with, generate_key,
    generate_salt, Algorithm, EncryptedRecord, KdfParams,
};
use std::time::Duration;

/// Generate a payload of given size.
fn generate_payload(size: usize) -> Vec<u8> {
    vec![b'x'; size]
}

const SIZES: [usize; 5] = [32, 256, 1024, 4096, 16384];

/// Encrypt/decrypt roundtrip per algorithm and payload size.
fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("roundtrip");
    group.sample_size(50);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    let key = generate_key();
    for alg in Algorithm::ALL {
        for size in SIZES {
            let payload = generate_payload(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(alg.tag(), format!("{}B", size)),
                &payload,
                |b, payload| {
                    b.iter(|| {
                        let ct = encrypt_with(*alg, black_box(payload), key.as_bytes()).unwrap();
                        let pt = decrypt_with(*alg, black_box(&ct), key.as_bytes()).unwrap();
                        black_box(pt);
                    });
                },
            );
        }
    }

    group.finish();
}

/// Deterministic encryption, as used by the git backend.
fn bench_deterministic(c: &mut Criterion) {
    let mut group = c.benchmark_group("deterministic");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));

    let key = generate_key();
    for size in SIZES {
        let payload = generate_payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{}B", size)), &payload, |b, payload| {
            b.iter(|| {
                let ct = encrypt_deterministic(black_box(payload), key.as_bytes(), b"development/API_KEY").unwrap();
                black_box(ct);
            });
        });
    }

    group.finish();
}

/// Sealing and opening a full record, including JSON encoding.
fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    group.sample_size(50);

    let key = generate_key();
    let payload = generate_payload(256);

    group.bench_function("seal_serialize", |b| {
        b.iter(|| {
            let record = EncryptedRecord::seal(Algorithm::default(), key.as_bytes(), black_box(&payload), &[]).unwrap();
            black_box(serde_json::to_vec(&record).unwrap());
        });
    });

    let json = serde_json::to_vec(
        &EncryptedRecord::seal(Algorithm::default(), key.as_bytes(), &payload, &[]).unwrap(),
    )
    .unwrap();
    group.bench_function("parse_open", |b| {
        b.iter(|| {
            let record: EncryptedRecord = serde_json::from_slice(black_box(&json)).unwrap();
            black_box(record.open(key.as_bytes()).unwrap());
        });
    });

    group.finish();
}

/// Key derivation at test and production cost.
fn bench_kdf(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdf");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    let salt = generate_salt();
    for (name, params) in [("fast", KdfParams::fast()), ("default", KdfParams::default())] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(derive_key_with(b"correct horse battery staple", &salt, &params).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_roundtrip, bench_deterministic, bench_record, bench_kdf);
criterion_main!(benches);
