use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use weight_posterior::{
    build_model, compute_kde, log_likelihood, run_inference, Dataset, LogitProposal,
    SamplerSettings,
};

fn make_datasets(num_items: usize) -> Vec<Dataset> {
    let items = (0..num_items).map(|i| format!("item-{i}")).collect::<Vec<_>>();
    (0..8)
        .map(|d| {
            let counts = items
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), ((i * 7 + d * 3) % 50 + 1) as u64));
            Dataset::new(counts).with_inputs([items[d % num_items].clone()])
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let datasets = make_datasets(20);
    let model = build_model(&datasets).unwrap();
    let weights = vec![1. / 20.; 20];
    c.bench_function("log likelihood 20 items", |b| {
        b.iter(|| log_likelihood(black_box(&model), black_box(&weights)))
    });

    let proposal = LogitProposal::new(0.1).unwrap();
    let mut out = vec![0.; 20];
    c.bench_function("proposal 20 items", |b| {
        b.iter_batched(
            || ChaCha8Rng::seed_from_u64(42),
            |mut rng| proposal.propose(&mut rng, black_box(&weights), &mut out),
            BatchSize::SmallInput,
        )
    });

    let samples: Vec<f64> = (0..4000).map(|i| ((i * 37) % 4000) as f64 / 4000.).collect();
    c.bench_function("kde 4000 samples", |b| {
        b.iter(|| compute_kde(black_box(&samples), 100))
    });

    let settings = SamplerSettings {
        num_samples: 500,
        burn_in: 200,
        seed: 42,
        ..Default::default()
    };
    c.bench_function("inference 20 items", |b| {
        b.iter(|| run_inference(black_box(&datasets), settings, None).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
