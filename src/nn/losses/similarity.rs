//! L1 similarity/dissimilarity loss for siamese training
//!
//! For each example `i` with `d = sum_j |a[i,j] - b[i,j]|`:
//!
//! - similar pair (label truncates to 0): `alpha * d^2`
//! - dissimilar pair: `beta * exp(gamma * d)`
//!
//! The loss is the mean over the batch. Backward does not divide by the
//! batch size; the caller folds that into `upstream_grad`.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::{LossOutput, PairGradients, PairLayout, PairLossKernel, Propagate};
use crate::{
    config::{DissimilarGradient, SimLossConfig, SimilarityLossParams},
    error::{SimLossError, SimLossResult},
    tensor::{Shape, Tensor},
};

/// Label decoding used by Forward and Backward: truncate toward zero, then
/// compare with zero.
#[inline]
pub fn is_similar(label: f32) -> bool {
    label as i32 == 0
}

/// Values produced by Forward and consumed by Backward
#[derive(Debug, Clone)]
pub struct SimilarityCache {
    layout: PairLayout,
    /// `a - b`, `[N * C]`
    diff: Vec<f32>,
    l1dists: Vec<f32>,
    similar: Vec<bool>,
}

impl SimilarityCache {
    pub fn layout(&self) -> PairLayout {
        self.layout
    }

    pub fn diff(&self) -> &[f32] {
        &self.diff
    }

    pub fn l1_distances(&self) -> &[f32] {
        &self.l1dists
    }

    pub fn is_similar(&self, example: usize) -> bool {
        self.similar[example]
    }

    /// `+1` where `a - b >= 0`, `-1` elsewhere
    fn signs(&self) -> Vec<f32> {
        self.diff
            .iter()
            .map(|&d| if d >= 0.0 { 1.0 } else { -1.0 })
            .collect()
    }
}

/// Pair similarity loss kernel
#[derive(Debug, Clone)]
pub struct SimilarityLoss {
    params: SimilarityLossParams,
    layout: Option<PairLayout>,
}

impl SimilarityLoss {
    pub fn new(params: SimilarityLossParams) -> SimLossResult<Self> {
        params.validate()?;
        Ok(Self { params, layout: None })
    }

    pub fn from_config(config: &SimLossConfig) -> SimLossResult<Self> {
        Self::new(config.loss)
    }

    pub fn params(&self) -> &SimilarityLossParams {
        &self.params
    }

    /// Layout recorded by the last successful setup
    pub fn layout(&self) -> Option<PairLayout> {
        self.layout
    }

    fn validate_shapes(a: Shape<4>, b: Shape<4>, labels: Shape<4>) -> SimLossResult<PairLayout> {
        if a.channels() != b.channels() {
            return Err(SimLossError::shape_error(
                &format!("B with {} channels", a.channels()),
                &format!("{} channels", b.channels()),
                Some("both sides of a pair must have the same dimension"),
            ));
        }
        for (name, shape) in [("A", a), ("B", b)] {
            if shape.height() != 1 || shape.width() != 1 {
                return Err(SimLossError::shape_error(
                    &format!("{} with unit height and width", name),
                    &shape.to_string(),
                    Some("flatten the feature vectors to [N, C, 1, 1]"),
                ));
            }
        }
        if labels.channels() != 1 || labels.height() != 1 || labels.width() != 1 {
            return Err(SimLossError::shape_error(
                "labels of shape [N, 1, 1, 1]",
                &labels.to_string(),
                None,
            ));
        }
        if a.batch() != b.batch() || a.batch() != labels.batch() {
            return Err(SimLossError::shape_error(
                &format!("batch size {} for A, B and labels", a.batch()),
                &format!("A {}, B {}, labels {}", a, b, labels),
                None,
            ));
        }
        if a.batch() == 0 || a.channels() == 0 {
            return Err(SimLossError::shape_error(
                "a non-empty batch",
                &a.to_string(),
                None,
            ));
        }
        Ok(PairLayout {
            batch_size: a.batch(),
            dim: a.channels(),
        })
    }

    fn checked_layout(&self, a: &Tensor, b: &Tensor, labels: &Tensor) -> SimLossResult<PairLayout> {
        let layout = self.layout.ok_or_else(|| {
            SimLossError::InvalidState("setup() must succeed before forward()".to_string())
        })?;
        let expected = layout.input_shape();
        for (name, shape) in [("A", a.shape()), ("B", b.shape())] {
            if shape != expected {
                return Err(SimLossError::shape_error(
                    &format!("{} of shape {}", name, expected),
                    &shape.to_string(),
                    Some("call setup() again when batch shapes change"),
                ));
            }
        }
        if labels.shape() != layout.label_shape() {
            return Err(SimLossError::shape_error(
                &format!("labels of shape {}", layout.label_shape()),
                &labels.shape().to_string(),
                Some("call setup() again when batch shapes change"),
            ));
        }
        Ok(layout)
    }

    fn example_loss(&self, l1dist: f32, similar: bool) -> f32 {
        let SimilarityLossParams { alpha, beta, gamma, .. } = self.params;
        if similar {
            alpha * l1dist * l1dist
        } else {
            beta * (gamma * l1dist).exp()
        }
    }

    /// Per-example factor multiplied by the element signs in Backward
    fn gradient_scale(&self, l1dist: f32, similar: bool, coeff: f32) -> f32 {
        let SimilarityLossParams { alpha, beta, gamma, dissimilar_gradient } = self.params;
        if similar {
            2.0 * alpha * coeff * l1dist
        } else {
            let the_exp = (gamma * l1dist).exp();
            match dissimilar_gradient {
                DissimilarGradient::Reference => beta * gamma * coeff * l1dist * the_exp,
                DissimilarGradient::Analytic => beta * gamma * coeff * the_exp,
            }
        }
    }

    fn write_gradient(&self, cache: &SimilarityCache, signs: &[f32], coeff: f32, out: &mut [f32]) {
        let dim = cache.layout.dim;
        let fill = |(i, (row, sign_row)): (usize, (&mut [f32], &[f32]))| {
            let scale = self.gradient_scale(cache.l1dists[i], cache.similar[i], coeff);
            for (o, &s) in row.iter_mut().zip(sign_row) {
                *o = scale * s;
            }
        };

        #[cfg(feature = "parallel")]
        out.par_chunks_mut(dim)
            .zip(signs.par_chunks(dim))
            .enumerate()
            .for_each(fill);

        #[cfg(not(feature = "parallel"))]
        out.chunks_mut(dim)
            .zip(signs.chunks(dim))
            .enumerate()
            .for_each(fill);
    }

    /// Backward into caller-owned buffers.
    ///
    /// A buffer whose flag is unset is left exactly as it was.
    pub fn backward_into(
        &self,
        cache: &SimilarityCache,
        upstream_grad: f32,
        propagate: Propagate,
        grad_a: &mut Tensor,
        grad_b: &mut Tensor,
    ) -> SimLossResult<()> {
        let expected = cache.layout.input_shape();
        for (name, flagged, shape) in [("A", propagate.a, grad_a.shape()), ("B", propagate.b, grad_b.shape())] {
            if flagged && shape != expected {
                return Err(SimLossError::shape_error(
                    &format!("gradient buffer for {} of shape {}", name, expected),
                    &shape.to_string(),
                    None,
                ));
            }
        }

        debug!(
            batch_size = cache.layout.batch_size,
            dim = cache.layout.dim,
            upstream_grad,
            propagate_a = propagate.a,
            propagate_b = propagate.b,
            "similarity loss backward"
        );

        if !propagate.a && !propagate.b {
            return Ok(());
        }

        let signs = cache.signs();
        if propagate.a {
            self.write_gradient(cache, &signs, upstream_grad, grad_a.as_slice_mut());
        }
        if propagate.b {
            self.write_gradient(cache, &signs, -upstream_grad, grad_b.as_slice_mut());
        }
        Ok(())
    }
}

impl PairLossKernel for SimilarityLoss {
    type Cache = SimilarityCache;

    fn name(&self) -> &'static str {
        "SimilarityLoss"
    }

    /// Validate pair and label shapes. On failure the previously recorded
    /// layout (if any) is kept.
    fn setup(&mut self, a: Shape<4>, b: Shape<4>, labels: Shape<4>) -> SimLossResult<PairLayout> {
        let layout = Self::validate_shapes(a, b, labels)?;
        info!(
            batch_size = layout.batch_size,
            dim = layout.dim,
            alpha = self.params.alpha,
            beta = self.params.beta,
            gamma = self.params.gamma,
            "similarity loss set up"
        );
        self.layout = Some(layout);
        Ok(layout)
    }

    fn forward(&self, a: &Tensor, b: &Tensor, labels: &Tensor) -> SimLossResult<LossOutput<SimilarityCache>> {
        let layout = self.checked_layout(a, b, labels)?;
        let PairLayout { batch_size, dim } = layout;

        let diff: Vec<f32> = a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(x, y)| x - y)
            .collect();
        let similar: Vec<bool> = labels.as_slice().iter().map(|&l| is_similar(l)).collect();

        #[cfg(feature = "parallel")]
        let l1dists: Vec<f32> = diff
            .par_chunks(dim)
            .map(|row| row.iter().map(|d| d.abs()).sum::<f32>())
            .collect();

        #[cfg(not(feature = "parallel"))]
        let l1dists: Vec<f32> = diff
            .chunks(dim)
            .map(|row| row.iter().map(|d| d.abs()).sum::<f32>())
            .collect();

        let total: f64 = l1dists
            .iter()
            .zip(&similar)
            .map(|(&d, &s)| f64::from(self.example_loss(d, s)))
            .sum();
        let loss = (total / batch_size as f64) as f32;

        if !loss.is_finite() {
            warn!(loss, gamma = self.params.gamma, "similarity loss is not finite");
        }
        debug!(batch_size, dim, loss, "similarity loss forward");

        Ok(LossOutput {
            loss,
            cache: SimilarityCache {
                layout,
                diff,
                l1dists,
                similar,
            },
        })
    }

    fn backward(
        &self,
        cache: &SimilarityCache,
        upstream_grad: f32,
        propagate: Propagate,
    ) -> SimLossResult<PairGradients> {
        let shape = cache.layout.input_shape();
        let mut grad_a = Tensor::zeros(if propagate.a { shape } else { Shape::new([0, 0, 1, 1]) });
        let mut grad_b = Tensor::zeros(if propagate.b { shape } else { Shape::new([0, 0, 1, 1]) });
        self.backward_into(cache, upstream_grad, propagate, &mut grad_a, &mut grad_b)?;
        Ok(PairGradients {
            a: propagate.a.then_some(grad_a),
            b: propagate.b.then_some(grad_b),
        })
    }
}
