//! Draws latent codes from a flow prior and prints their scores.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release -p latentflow-prior --bin sample-prior -- \
//!   --config prior.json --batch 2 --src-length 5 --length 6 \
//!   --nsamples 3 --seed 7 --include-zero
//! ```
//!
//! The config file is a JSON object with a `flow` section and an optional
//! `type` naming the registered variant (default: `normal`). Without
//! `--config`, a flow with default settings is used.
//!
//! Source encodings are random: the binary exercises the sampling path, it
//! does not translate anything.

use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use latentflow_core::noise::standard_normal;
use latentflow_core::ParamMap;
use latentflow_prior::{
    LatentPrior, PriorRegistry, SampleConfig, SourceLengthPredictor, TargetLength,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args);

    let (name, params) = load_params(config.config.as_ref());
    let src_features = params
        .get("flow")
        .and_then(|f| f.get("src_features"))
        .and_then(Value::as_u64)
        .unwrap_or(256) as usize;

    eprintln!("=== latentflow prior sampling ===");
    eprintln!("Prior:       {name}");
    eprintln!("Batch:       {}", config.batch);
    eprintln!("Src length:  {}", config.src_length);
    match config.predict {
        Some(k) => eprintln!("Length:      top-{k} predicted"),
        None => eprintln!("Length:      {}", config.length),
    }
    eprintln!("Samples:     {}", config.nsamples);
    eprintln!("Seed:        {}", config.seed);
    eprintln!();

    let device = Device::Cpu;
    let var_map = VarMap::new();
    let registry = PriorRegistry::with_defaults();
    let prior = registry
        .build(&name, params, &var_map, &device)
        .unwrap_or_else(|e| {
            eprintln!("ERROR: failed to build prior: {e}");
            std::process::exit(1);
        });
    eprintln!(
        "Built prior: {} features, length unit {}, {} parameter tensors",
        prior.features(),
        prior.length_unit(),
        var_map.all_vars().len()
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let src = standard_normal(
        &mut rng,
        (config.batch, config.src_length, src_features),
        &device,
    )
    .unwrap_or_else(|e| {
        eprintln!("ERROR: failed to draw source encoding: {e}");
        std::process::exit(1);
    });
    let src_mask = Tensor::ones((config.batch, config.src_length), DType::F32, &device)
        .unwrap_or_else(|e| {
            eprintln!("ERROR: failed to build source mask: {e}");
            std::process::exit(1);
        });

    let sample_config = SampleConfig {
        nsamples: config.nsamples,
        include_zero: config.include_zero,
        ..SampleConfig::default()
    };
    let predictor = SourceLengthPredictor;
    let target = match config.predict {
        Some(nlengths) => TargetLength::Predicted {
            predictor: &predictor,
            nlengths,
        },
        None => TargetLength::Fixed(config.length),
    };

    let start = Instant::now();
    let sample = prior
        .sample(&src, &src_mask, target, &sample_config, &mut rng)
        .unwrap_or_else(|e| {
            eprintln!("ERROR: sampling failed: {e}");
            std::process::exit(1);
        });
    let elapsed = start.elapsed().as_secs_f32();

    eprintln!("z shape:     {:?}", sample.z.dims());
    eprintln!("Sampled in {elapsed:.3}s");
    eprintln!();

    let log_probs = sample.log_probs.to_vec1::<f32>().unwrap_or_else(|e| {
        eprintln!("ERROR: failed to read log-probabilities: {e}");
        std::process::exit(1);
    });
    for (row, (lp, length)) in log_probs.iter().zip(&sample.lengths).enumerate() {
        println!("row {row:3}  length {length:3}  log p(z) = {lp:.4}");
    }
}

struct CliConfig {
    config: Option<PathBuf>,
    batch: usize,
    src_length: usize,
    length: usize,
    nsamples: usize,
    seed: u64,
    include_zero: bool,
    predict: Option<usize>,
}

/// Reads the prior configuration, splitting off the variant name.
fn load_params(path: Option<&PathBuf>) -> (String, ParamMap) {
    let Some(path) = path else {
        let mut params = ParamMap::new();
        params.insert("flow".to_string(), Value::Object(ParamMap::new()));
        return ("normal".to_string(), params);
    };

    let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("ERROR: failed to read {}: {e}", path.display());
        std::process::exit(1);
    });
    let mut params = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            eprintln!("ERROR: {} must hold a JSON object", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("ERROR: failed to parse {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    let name = match params.remove("type") {
        Some(Value::String(name)) => name,
        Some(other) => {
            eprintln!("ERROR: 'type' must be a string, got {other}");
            std::process::exit(1);
        }
        None => "normal".to_string(),
    };
    (name, params)
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i)
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            eprintln!("ERROR: invalid {flag} value");
            std::process::exit(1);
        })
}

fn parse_args(args: &[String]) -> CliConfig {
    let mut config = CliConfig {
        config: None,
        batch: 2,
        src_length: 5,
        length: 6,
        nsamples: 1,
        seed: 42,
        include_zero: false,
        predict: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config.config = Some(PathBuf::from(parse_value::<String>(args, i, "--config")));
            }
            "--batch" => {
                i += 1;
                config.batch = parse_value(args, i, "--batch");
            }
            "--src-length" => {
                i += 1;
                config.src_length = parse_value(args, i, "--src-length");
            }
            "--length" => {
                i += 1;
                config.length = parse_value(args, i, "--length");
            }
            "--nsamples" => {
                i += 1;
                config.nsamples = parse_value(args, i, "--nsamples");
            }
            "--seed" => {
                i += 1;
                config.seed = parse_value(args, i, "--seed");
            }
            "--predict" => {
                i += 1;
                config.predict = Some(parse_value(args, i, "--predict"));
            }
            "--include-zero" => config.include_zero = true,
            "--help" | "-h" => {
                eprintln!("Usage: sample-prior [options]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --config PATH      JSON prior configuration");
                eprintln!("  --batch N          Source examples (default: 2)");
                eprintln!("  --src-length N     Source positions per example (default: 5)");
                eprintln!("  --length N         Target length (default: 6)");
                eprintln!("  --predict K        Sample at the top-K predicted lengths instead");
                eprintln!("  --nsamples N       Samples per example and length (default: 1)");
                eprintln!("  --seed N           RNG seed (default: 42)");
                eprintln!("  --include-zero     Make the first sample the base-distribution mode");
                std::process::exit(0);
            }
            other => {
                eprintln!("ERROR: unknown argument '{other}'");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}
