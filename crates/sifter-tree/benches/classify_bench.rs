//! Criterion benchmarks for sifter-tree: expression compilation and batch classification.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use sifter_tree::expr::Expression;
use sifter_tree::presets::{LegacyThresholds, SCORE_METRICS, legacy_three_stage};
use sifter_tree::{ClassifierConfig, FeatureRecord};

fn make_features(n: usize, seed: u64) -> Vec<FeatureRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mut record = FeatureRecord::new(i as i64)
                .with_metric("feature_splitting", rng.r#gen::<f64>() * 1e-4)
                .with_metric("semdist_mean", rng.r#gen::<f64>() * 0.3);
            for metric in SCORE_METRICS {
                record = record.with_metric(metric, rng.r#gen::<f64>());
            }
            record
        })
        .collect()
}

fn bench_classify_parallel(c: &mut Criterion) {
    let structure = legacy_three_stage(&LegacyThresholds::default()).unwrap();
    let features = make_features(10_000, 42);
    let config = ClassifierConfig::new();

    c.bench_function("classify_legacy_10k_parallel", |b| {
        b.iter(|| config.classify(&structure, &features));
    });
}

fn bench_classify_sequential(c: &mut Criterion) {
    let structure = legacy_three_stage(&LegacyThresholds::default()).unwrap();
    let features = make_features(10_000, 42);
    let config = ClassifierConfig::new().with_parallel(false);

    c.bench_function("classify_legacy_10k_sequential", |b| {
        b.iter(|| config.classify(&structure, &features));
    });
}

fn bench_expression_compile(c: &mut Criterion) {
    let source = "(score_fuzz >= 0.5 and score_detection >= 0.2) or not (0.1 < semdist_mean <= 0.3)";

    c.bench_function("expression_compile", |b| {
        b.iter(|| Expression::compile(source).unwrap());
    });
}

criterion_group!(
    benches,
    bench_classify_parallel,
    bench_classify_sequential,
    bench_expression_compile
);
criterion_main!(benches);
