use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use latentflow_core::noise::standard_normal;
use latentflow_flow::{ConditionalFlow, FlowConfig};
use latentflow_prior::{LatentPrior, Prior, SampleConfig, TargetLength};
use rand::rngs::StdRng;
use rand::SeedableRng;

const BATCH: usize = 8;
const SRC_LENGTH: usize = 20;
const SRC_FEATURES: usize = 64;
const LENGTH: usize = 22;

fn bench_prior() -> Prior<ConditionalFlow> {
    let config = FlowConfig {
        src_features: SRC_FEATURES,
        ..FlowConfig::default()
    };
    let flow = ConditionalFlow::new(config, &VarMap::new(), &Device::Cpu).unwrap();
    Prior::new(flow)
}

fn source(rng: &mut StdRng) -> (Tensor, Tensor) {
    let device = Device::Cpu;
    let src = standard_normal(rng, (BATCH, SRC_LENGTH, SRC_FEATURES), &device).unwrap();
    let src_mask = Tensor::ones((BATCH, SRC_LENGTH), DType::F32, &device).unwrap();
    (src, src_mask)
}

fn bench_sample(c: &mut Criterion) {
    let prior = bench_prior();
    let mut rng = StdRng::seed_from_u64(0);
    let (src, src_mask) = source(&mut rng);
    let config = SampleConfig {
        nsamples: 4,
        ..SampleConfig::default()
    };

    c.bench_function("sample (batch 8, length 22, 4 samples)", |b| {
        b.iter(|| {
            black_box(
                prior
                    .sample(&src, &src_mask, TargetLength::Fixed(LENGTH), &config, &mut rng)
                    .unwrap(),
            )
        })
    });
}

fn bench_log_probability(c: &mut Criterion) {
    let prior = bench_prior();
    let mut rng = StdRng::seed_from_u64(1);
    let (src, src_mask) = source(&mut rng);
    let sample = prior
        .sample(
            &src,
            &src_mask,
            TargetLength::Fixed(24),
            &SampleConfig::default(),
            &mut rng,
        )
        .unwrap();

    c.bench_function("log_probability (batch 8, length 24)", |b| {
        b.iter(|| {
            black_box(
                prior
                    .log_probability(&sample.z, &sample.tgt_mask, &src, &src_mask)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_sample, bench_log_probability);
criterion_main!(benches);
