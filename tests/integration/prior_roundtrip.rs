//! End-to-end: build a prior from a configuration mapping, sample, rescore
//! the samples, and feed both scores into the KL objective.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use latentflow::core::mask::length_mask;
use latentflow::core::noise::standard_normal;
use latentflow::core::padding::{pad_front, padded_sizes};
use latentflow::core::LatentError;
use latentflow::prior::objective::{kl_divergence, per_example};
use latentflow::prior::{LatentPrior, PriorRegistry, SampleConfig, TargetLength};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

const HIDDEN: usize = 12;

fn build(levels: usize) -> latentflow::prior::AnyPrior {
    let params = json!({
        "flow": {
            "features": 6,
            "src_features": HIDDEN,
            "hidden_features": 24,
            "levels": levels,
        }
    })
    .as_object()
    .cloned()
    .unwrap();
    PriorRegistry::with_defaults()
        .build("normal", params, &VarMap::new(), &Device::Cpu)
        .unwrap()
}

#[test]
fn samples_rescore_to_their_own_log_probability() {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(5);
    let prior = build(3);

    let src = standard_normal(&mut rng, (3, 7, HIDDEN), &device).unwrap();
    let src_mask = length_mask(&[7, 4, 6], 7, &device).unwrap();
    let config = SampleConfig {
        nsamples: 2,
        ..SampleConfig::default()
    };
    let sample = prior
        .sample(&src, &src_mask, TargetLength::Fixed(8), &config, &mut rng)
        .unwrap();
    assert_eq!(sample.z.dims(), &[6, 8, 6]);

    let rescored = prior
        .log_probability(&sample.z, &sample.tgt_mask, &sample.src, &sample.src_mask)
        .unwrap();
    let expected = sample.log_probs.to_vec1::<f32>().unwrap();
    let actual = rescored.to_vec1::<f32>().unwrap();
    for (e, a) in expected.iter().zip(&actual) {
        assert!((e - a).abs() <= 1e-4 * e.abs().max(1.0), "{e} vs {a}");
    }

    // Scoring the prior's own samples against themselves gives zero KL.
    let q = per_example(&sample.log_probs, 2).unwrap();
    let p = per_example(&rescored, 2).unwrap();
    let kl = kl_divergence(&q, &p, true).unwrap().to_scalar::<f32>().unwrap();
    assert!(kl.abs() < 5e-2, "kl {kl}");
}

#[test]
fn unpadded_length_is_rejected_by_the_flow() {
    let device = Device::Cpu;
    let prior = build(3);
    let src = Tensor::zeros((1, 3, HIDDEN), DType::F32, &device).unwrap();
    let src_mask = Tensor::ones((1, 3), DType::F32, &device).unwrap();
    let eps = Tensor::zeros((1, 6, 6), DType::F32, &device).unwrap();
    let tgt_mask = Tensor::ones((1, 6), DType::F32, &device).unwrap();

    let err = prior.decode(&eps, &tgt_mask, &src, &src_mask).unwrap_err();
    assert!(matches!(err, LatentError::InvalidLength { length: 6, unit: 4 }));
}

#[test]
fn padded_token_batches_fit_the_flow() {
    let device = Device::Cpu;
    let prior = build(3);
    let unit = prior.length_unit().max(latentflow::core::LENGTH_UNIT);

    let sizes = padded_sizes(&[3, 5, 9], unit);
    assert_eq!(sizes, vec![4, 8, 12]);

    let tokens = pad_front(&[7u32, 8, 9, 10, 11], 0, 8);
    assert_eq!(tokens, vec![0, 0, 0, 7, 8, 9, 10, 11]);

    let src = Tensor::zeros((1, 2, HIDDEN), DType::F32, &device).unwrap();
    let src_mask = Tensor::ones((1, 2), DType::F32, &device).unwrap();
    let eps = Tensor::zeros((1, sizes[2], 6), DType::F32, &device).unwrap();
    let tgt_mask = length_mask(&[9], sizes[2], &device).unwrap();
    let (z, lp) = prior.decode(&eps, &tgt_mask, &src, &src_mask).unwrap();
    assert_eq!(z.dims(), &[1, 12, 6]);
    assert!(lp.to_vec1::<f32>().unwrap()[0].is_finite());
}
