// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for the vault.
//!
//! Measures raw AES-256-GCM throughput, simulated KMS wrapping and the full
//! encrypt/decrypt path through the orchestrator.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ring::rand::SystemRandom;
use secure_vault::{
    AeadEngine, DataEncryptionKey, Environment, KmsAdapter, ObjectLocation, SecureVault,
    SimulatedKms, VaultConfig,
};
use tokio::runtime::Runtime;

const SIZES: [usize; 5] = [64, 1024, 4096, 65536, 1 << 20];

fn bench_aead(c: &mut Criterion) {
    let engine = AeadEngine::new();
    let dek = DataEncryptionKey::generate(&SystemRandom::new()).expect("failed to generate DEK");

    let mut group = c.benchmark_group("aead");

    for size in SIZES {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &data, |b, data| {
            b.iter(|| black_box(engine.encrypt(&dek, black_box(data), b"object-id").unwrap()))
        });

        let sealed = engine.encrypt(&dek, &data, b"object-id").unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt", size), &sealed, |b, sealed| {
            b.iter(|| {
                black_box(
                    engine
                        .decrypt(&dek, black_box(&sealed.ciphertext), &sealed.iv, &sealed.tag, b"object-id")
                        .unwrap(),
                )
            })
        });
    }

    group.finish();
}

fn bench_simulated_kms(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let kms = SimulatedKms::new(Environment::Test, "mk-1").expect("failed to create KMS");
    let dek = DataEncryptionKey::generate(&SystemRandom::new()).expect("failed to generate DEK");
    let wrapped = rt
        .block_on(kms.wrap_key("mk-1", &dek))
        .expect("failed to wrap DEK");

    let mut group = c.benchmark_group("simulated_kms");

    group.bench_function("wrap_key", |b| {
        b.iter(|| black_box(rt.block_on(kms.wrap_key("mk-1", black_box(&dek))).unwrap()))
    });

    group.bench_function("unwrap_key", |b| {
        b.iter(|| {
            black_box(
                rt.block_on(kms.unwrap_key("mk-1", black_box(&wrapped.bytes)))
                    .unwrap(),
            )
        })
    });

    group.bench_function("sign_payload", |b| {
        b.iter(|| black_box(rt.block_on(kms.sign_payload(black_box(b"certificate"))).unwrap()))
    });

    group.finish();
}

fn bench_vault(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let kms = SimulatedKms::new(Environment::Test, "mk-1").expect("failed to create KMS");
    let config = VaultConfig::new("mk-1").with_environment(Environment::Test);
    let vault = SecureVault::new(Arc::new(kms), config).expect("failed to create vault");

    let mut group = c.benchmark_group("vault");

    for size in [1024usize, 65536] {
        let data = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt_object", size), &data, |b, data| {
            b.iter(|| {
                let object = rt
                    .block_on(vault.encrypt_object(ObjectLocation::new("bench", "obj"), black_box(data)))
                    .unwrap();
                black_box(object)
            })
        });

        let object = rt
            .block_on(vault.encrypt_object(ObjectLocation::new("bench", "obj"), &data))
            .unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt_object", size), &object, |b, object| {
            b.iter(|| black_box(rt.block_on(vault.decrypt_object(black_box(object))).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_aead, bench_simulated_kms, bench_vault);
criterion_main!(benches);
