//! Cryptographic operation benchmarks.
//!
//! Covers the per-request hot paths: key agreement on completion, session
//! key derivation, and sealing or opening file payloads.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use sfx::crypto::{
    derive_session_key, Aead, AeadKey, DhGenerator, KeyPair, RawSharedValue,
};

fn bench_dh_keygen(c: &mut Criterion) {
    // Parameter search is far too slow to sit inside the measured loop
    let generator = DhGenerator::new(2048, 10_000).unwrap();
    let (params, _) = generator.generate().unwrap();

    c.bench_function("dh_keygen_2048", |b| {
        b.iter(|| black_box(KeyPair::generate(&params).unwrap()))
    });
}

fn bench_dh_compute_shared(c: &mut Criterion) {
    let generator = DhGenerator::new(2048, 10_000).unwrap();
    let (params, server) = generator.generate().unwrap();
    let client = KeyPair::generate(&params).unwrap();

    c.bench_function("dh_compute_shared_2048", |b| {
        b.iter(|| black_box(server.compute_shared(&params, client.public()).unwrap()))
    });
}

fn bench_derive_session_key(c: &mut Criterion) {
    let shared = RawSharedValue::from_bytes(vec![0x42u8; 256]);

    c.bench_function("derive_session_key", |b| {
        b.iter(|| black_box(derive_session_key(&shared, "bench-session").unwrap()))
    });
}

fn bench_seal(c: &mut Criterion) {
    let aead = Aead::new(&AeadKey::from_bytes([0x42u8; 32]));
    let plaintext = vec![0u8; 64 * 1024];

    let mut group = c.benchmark_group("aead_seal");
    group.throughput(Throughput::Bytes(plaintext.len() as u64));
    group.bench_function("64_KiB", |b| {
        b.iter(|| black_box(aead.seal(&plaintext, b"bench-session").unwrap()))
    });
    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let aead = Aead::new(&AeadKey::from_bytes([0x42u8; 32]));
    let plaintext = vec![0u8; 64 * 1024];
    let sealed = aead.seal(&plaintext, b"bench-session").unwrap();

    let mut group = c.benchmark_group("aead_open");
    group.throughput(Throughput::Bytes(plaintext.len() as u64));
    group.bench_function("64_KiB", |b| {
        b.iter(|| black_box(aead.open(&sealed, b"bench-session").unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_dh_keygen,
    bench_dh_compute_shared,
    bench_derive_session_key,
    bench_seal,
    bench_open,
);

criterion_main!(benches);
