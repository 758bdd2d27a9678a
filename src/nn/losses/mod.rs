//! Pairwise metric-learning loss functions
//!
//! A pair loss takes two aligned batches of flat vectors plus one label per
//! example and produces a scalar loss. Forward hands back an explicit cache
//! which Backward consumes, so a gradient can only ever be computed from the
//! Forward pass that produced it.

pub mod similarity;

pub use similarity::{SimilarityCache, SimilarityLoss};

use crate::{
    error::SimLossResult,
    tensor::{Shape, Tensor},
};

/// Batch geometry accepted by a kernel after a successful setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairLayout {
    pub batch_size: usize,
    pub dim: usize,
}

impl PairLayout {
    /// Shape of each of the two vector batches
    pub fn input_shape(&self) -> Shape<4> {
        Shape::new([self.batch_size, self.dim, 1, 1])
    }

    /// Shape of the label batch
    pub fn label_shape(&self) -> Shape<4> {
        Shape::new([self.batch_size, 1, 1, 1])
    }
}

/// Scalar loss plus whatever Backward needs from the Forward pass
#[derive(Debug, Clone)]
pub struct LossOutput<C> {
    pub loss: f32,
    pub cache: C,
}

/// Per-input propagate flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Propagate {
    pub a: bool,
    pub b: bool,
}

impl Propagate {
    pub const BOTH: Propagate = Propagate { a: true, b: true };
    pub const NONE: Propagate = Propagate { a: false, b: false };
    pub const ONLY_A: Propagate = Propagate { a: true, b: false };
    pub const ONLY_B: Propagate = Propagate { a: false, b: true };
}

impl Default for Propagate {
    fn default() -> Self {
        Self::BOTH
    }
}

/// Gradients produced by Backward; `None` for inputs that were not propagated
#[derive(Debug, Clone, Default)]
pub struct PairGradients {
    pub a: Option<Tensor>,
    pub b: Option<Tensor>,
}

/// Narrow Forward/Backward interface a training loop drives directly
pub trait PairLossKernel: Send + Sync {
    /// State carried from Forward into Backward
    type Cache;

    /// Get the name of the loss function
    fn name(&self) -> &'static str;

    /// Validate the batch shapes and record the layout for later calls
    fn setup(&mut self, a: Shape<4>, b: Shape<4>, labels: Shape<4>) -> SimLossResult<PairLayout>;

    /// Compute the scalar loss
    fn forward(&self, a: &Tensor, b: &Tensor, labels: &Tensor) -> SimLossResult<LossOutput<Self::Cache>>;

    /// Compute gradients for the flagged inputs, scaled by `upstream_grad`
    fn backward(
        &self,
        cache: &Self::Cache,
        upstream_grad: f32,
        propagate: Propagate,
    ) -> SimLossResult<PairGradients>;
}
