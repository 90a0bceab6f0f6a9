// Hot-path benchmarks for the RLN engine.
//
// Covers nullifier derivation, ledger admission under a growing epoch window,
// and local proof generation and verification.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rln_protocol::config::{ReplayPolicy, RLN_CIRCUIT_ID};
use rln_protocol::crypto::{commit_content, derive_nullifier, IdentitySecret};
use rln_protocol::ledger::NullifierLedger;
use rln_protocol::proof::{LocalBackend, PrivateInputs, PublicSignals};
use rln_protocol::types::{Epoch, GroupId, Nullifier};

fn bench_derive_nullifier(c: &mut Criterion) {
    let secret = IdentitySecret::generate();

    c.bench_function("nullifier/derive", |b| {
        b.iter(|| derive_nullifier(&secret, Epoch(29_000_000)));
    });
}

fn bench_ledger_admit(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/admit");

    for size in [100usize, 10_000] {
        let nullifiers: Vec<Nullifier> = (0..size)
            .map(|_| derive_nullifier(&IdentitySecret::generate(), Epoch(1)))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &nullifiers, |b, ns| {
            b.iter(|| {
                let ledger = NullifierLedger::new(u32::MAX, ReplayPolicy::BoundedReuse, Epoch(1));
                for n in ns {
                    let _ = ledger.admit(n, Epoch(1));
                }
            });
        });
    }

    group.finish();
}

fn statement(secret: &IdentitySecret) -> (PrivateInputs, PublicSignals) {
    let epoch = Epoch(29_000_000);
    let group = GroupId::new("bench").expect("non-empty group");
    let commitment = commit_content(b"benchmark message body");
    let public = PublicSignals::new(derive_nullifier(secret, epoch), epoch, commitment, &group);
    let private = PrivateInputs {
        identity_secret: secret.clone(),
        epoch,
        group,
        content_commitment: commitment,
    };
    (private, public)
}

fn bench_local_prove(c: &mut Criterion) {
    let backend = LocalBackend::ephemeral();
    let (private, public) = statement(&IdentitySecret::generate());

    c.bench_function("local_backend/prove", |b| {
        b.iter(|| backend.prove(RLN_CIRCUIT_ID, &private, &public));
    });
}

fn bench_local_verify(c: &mut Criterion) {
    let backend = LocalBackend::ephemeral();
    let (private, public) = statement(&IdentitySecret::generate());
    let artifact = backend
        .prove(RLN_CIRCUIT_ID, &private, &public)
        .expect("valid witness");

    c.bench_function("local_backend/verify", |b| {
        b.iter(|| backend.check(RLN_CIRCUIT_ID, &artifact, &artifact.public_signals));
    });
}

criterion_group!(
    benches,
    bench_derive_nullifier,
    bench_ledger_admit,
    bench_local_prove,
    bench_local_verify,
);
criterion_main!(benches);
