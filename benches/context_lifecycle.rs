use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use isojit::config::CompartmentConfig;
use isojit::jit::{SymbolResolver, TypeVocabulary, ValueKind};
use isojit::runtime::{clone_context, Compartment, MAX_GLOBAL_BYTES};

/// Template of `n` distinct global bytes
fn template(n: usize) -> Vec<u8> {
    (0..n).map(|i| i as u8).collect()
}

/// Context creation cost as the globals template grows
/// Each iteration gets a fresh single-slot compartment so ids never run out
fn bench_create_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_context");
    let config = CompartmentConfig { max_contexts: 1 };

    for num_global_bytes in [0, 64, 1024, MAX_GLOBAL_BYTES].iter() {
        let globals = template(*num_global_bytes);
        group.bench_with_input(
            BenchmarkId::from_parameter(num_global_bytes),
            num_global_bytes,
            |b, _| {
                b.iter_batched(
                    || Compartment::with_config(&globals, &config).unwrap(),
                    |compartment| black_box(compartment.create_context().unwrap()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Cloning a context into another compartment
fn bench_clone_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_context");
    let config = CompartmentConfig { max_contexts: 1 };

    for num_global_bytes in [64, MAX_GLOBAL_BYTES].iter() {
        let globals = template(*num_global_bytes);
        let source_compartment = Compartment::new(&globals).unwrap();
        let source = source_compartment.create_context().unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(num_global_bytes),
            num_global_bytes,
            |b, _| {
                b.iter_batched(
                    || Compartment::with_config(&globals, &config).unwrap(),
                    |target| black_box(unsafe { clone_context(&source, &target) }.unwrap()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Liveness checks against a populated slot table
fn bench_is_live(c: &mut Criterion) {
    let compartment = Compartment::new(&template(16)).unwrap();
    let contexts: Vec<_> = (0..512).map(|_| compartment.create_context().unwrap()).collect();
    for context in contexts.iter().step_by(2) {
        context.finalize();
    }
    let ids: Vec<_> = contexts.iter().map(|c| c.id()).collect();

    c.bench_function("is_live_512", |b| {
        b.iter(|| ids.iter().filter(|id| compartment.is_live(black_box(**id))).count());
    });
}

/// Allow-list resolution and vocabulary construction
fn bench_jit_tables(c: &mut Criterion) {
    let resolver = SymbolResolver::host().unwrap();

    c.bench_function("resolve_memcpy", |b| {
        b.iter(|| black_box(resolver.resolve(black_box("memcpy"))));
    });

    c.bench_function("resolve_unlisted", |b| {
        b.iter(|| black_box(resolver.resolve(black_box("getpid"))));
    });

    c.bench_function("type_vocabulary_new", |b| {
        b.iter(|| {
            let vocab = TypeVocabulary::new().unwrap();
            black_box(vocab.type_of(ValueKind::V128))
        });
    });
}

criterion_group!(
    benches,
    bench_create_context,
    bench_clone_context,
    bench_is_live,
    bench_jit_tables
);
criterion_main!(benches);
