//! # latentflow
//!
//! Normalizing-flow latent prior for non-autoregressive sequence-to-sequence
//! models.
//!
//! This crate re-exports the workspace:
//!
//! - [`core`]: errors, masks, noise, padding, configuration mappings
//! - [`flow`]: the [`Flow`](flow::Flow) contract and [`ConditionalFlow`](flow::ConditionalFlow)
//! - [`prior`]: the flow prior, its registry, and the KL objective
//!
//! ```
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::VarMap;
//! use latentflow::prior::{LatentPrior, PriorRegistry, SampleConfig, TargetLength};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use serde_json::json;
//!
//! let device = Device::Cpu;
//! let params = json!({"flow": {"features": 8, "src_features": 4}})
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//! let prior = PriorRegistry::with_defaults()
//!     .build("normal", params, &VarMap::new(), &device)
//!     .unwrap();
//!
//! let src = Tensor::zeros((2, 5, 4), DType::F32, &device).unwrap();
//! let src_mask = Tensor::ones((2, 5), DType::F32, &device).unwrap();
//! let sample = prior
//!     .sample(
//!         &src,
//!         &src_mask,
//!         TargetLength::Fixed(6),
//!         &SampleConfig::default(),
//!         &mut StdRng::seed_from_u64(0),
//!     )
//!     .unwrap();
//! assert_eq!(sample.z.dims(), &[2, 6, 8]);
//! ```

pub use latentflow_core as core;
pub use latentflow_flow as flow;
pub use latentflow_prior as prior;

pub use latentflow_core::{LatentError, ParamMap};
