use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use malheur::cluster::{ClusterEngine, Linkage};
use malheur::config::FeatureConfig;
use malheur::feature::{FeatureHasher, FeatureVectorCollection, RawReport};
use malheur::prototype::PrototypeExtractor;
use malheur::similarity::{Kernel, SimilarityEngine};

fn generate_reports(count: usize) -> Vec<RawReport> {
    (0..count)
        .map(|i| {
            let family = i % 8;
            let tokens: Vec<String> = (0..40)
                .map(|j| format!("f{family}-call{}", (i * 13 + j * 7) % 64))
                .collect();
            RawReport::new(format!("r{i}"), format!("f{family}"), tokens)
        })
        .collect()
}

fn build(count: usize) -> FeatureVectorCollection {
    let hasher = FeatureHasher::new(1 << 20).unwrap();
    FeatureVectorCollection::from_reports(&generate_reports(count), &hasher, &FeatureConfig::default())
        .unwrap()
}

fn bench_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_matrix");
    for count in [100, 400] {
        let collection = build(count);
        for kernel in [Kernel::Linear, Kernel::Cosine] {
            let engine = SimilarityEngine::new(kernel);
            group.bench_with_input(BenchmarkId::new(kernel.name(), count), &collection, |b, data| {
                b.iter(|| black_box(engine.self_matrix(black_box(data)).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_prototypes(c: &mut Criterion) {
    let collection = build(1000);
    let extractor = PrototypeExtractor::new(SimilarityEngine::new(Kernel::Cosine), 0.65).unwrap();
    c.bench_function("prototypes_1000", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&collection)).unwrap()))
    });
}

fn bench_clustering(c: &mut Criterion) {
    let collection = build(400);
    let matrix = SimilarityEngine::new(Kernel::Cosine).self_matrix(&collection).unwrap();

    let mut group = c.benchmark_group("clustering");
    for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average] {
        let engine = ClusterEngine::new(linkage);
        group.bench_function(linkage.name(), |b| {
            b.iter(|| black_box(engine.dendrogram(black_box(&matrix)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_matrix, bench_prototypes, bench_clustering);
criterion_main!(benches);
