//! simloss - pairwise similarity loss for metric learning
//!
//! Features:
//! - L1 similarity/dissimilarity loss with Forward and Backward kernels
//! - Explicit Forward cache consumed by Backward
//! - Finite-difference gradient verification
//! - JSON configuration with builder and process-global manager
//! - Optional rayon data parallelism (`parallel` feature)
//!
//! ```
//! use simloss::{PairLossKernel, Propagate, SimilarityLoss, SimilarityLossParams, Tensor};
//!
//! let a = Tensor::from_rows(&[vec![1.0, 0.0]]).unwrap();
//! let b = Tensor::from_rows(&[vec![0.0, 0.0]]).unwrap();
//! let labels = Tensor::labels(&[0.0]);
//!
//! let mut loss = SimilarityLoss::new(SimilarityLossParams::new(1.0, 1.0, 1.0)).unwrap();
//! loss.setup(a.shape(), b.shape(), labels.shape()).unwrap();
//! let out = loss.forward(&a, &b, &labels).unwrap();
//! assert_eq!(out.loss, 1.0);
//!
//! let grads = loss.backward(&out.cache, 1.0, Propagate::BOTH).unwrap();
//! assert_eq!(grads.a.unwrap().as_slice(), &[2.0, 2.0]);
//! ```

pub mod config;
pub mod error;
pub mod nn;
pub mod tensor;
pub mod verification;

use tracing::Level;

pub use config::{DissimilarGradient, SimLossConfig, SimilarityLossParams};
pub use error::{SimLossError, SimLossResult};
pub use nn::losses::{
    LossOutput, PairGradients, PairLayout, PairLossKernel, Propagate, SimilarityCache, SimilarityLoss,
};
pub use tensor::{Shape, Tensor};
pub use verification::{GradientCheckReport, GradientChecker, PairInput};

/// Install a fmt subscriber at `info` level
pub fn init() -> SimLossResult<()> {
    init_with_level(Level::INFO)
}

/// Install a fmt subscriber at the given level.
///
/// A subscriber installed earlier (by the host application or a previous
/// call) stays in place.
pub fn init_with_level(level: Level) -> SimLossResult<()> {
    if tracing_subscriber::fmt().with_max_level(level).try_init().is_ok() {
        tracing::info!("simloss initialized");
    }
    Ok(())
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
