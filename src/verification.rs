//! Gradient verification for pair losses
//!
//! Compares the analytic Backward output with a central-difference estimate
//! of the Forward loss, element by element.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::GradientCheckConfig,
    error::{SimLossError, SimLossResult},
    nn::losses::{PairLossKernel, Propagate},
    tensor::{Shape, Tensor},
};

/// Which side of the pair is perturbed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairInput {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientMismatch {
    pub example: usize,
    pub channel: usize,
    pub analytic: f32,
    pub numeric: f32,
}

#[derive(Debug, Clone)]
pub struct GradientCheckReport {
    pub input: PairInput,
    pub checked: usize,
    /// Elements sitting on the L1 kink, where a finite difference is meaningless
    pub skipped: usize,
    pub max_error: f32,
    pub mismatches: Vec<GradientMismatch>,
}

impl GradientCheckReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Finite-difference gradient checker
#[derive(Debug, Clone, Copy)]
pub struct GradientChecker {
    stepsize: f32,
    threshold: f32,
    kink_margin: f32,
}

impl Default for GradientChecker {
    fn default() -> Self {
        Self::from_config(&GradientCheckConfig::default())
    }
}

impl GradientChecker {
    pub fn new(stepsize: f32, threshold: f32) -> Self {
        Self {
            stepsize,
            threshold,
            kink_margin: stepsize,
        }
    }

    pub fn from_config(config: &GradientCheckConfig) -> Self {
        Self {
            stepsize: config.stepsize,
            threshold: config.threshold,
            kink_margin: config.kink_margin.unwrap_or(config.stepsize),
        }
    }

    pub fn with_kink_margin(mut self, margin: f32) -> Self {
        self.kink_margin = margin;
        self
    }

    /// Check every element of `input`.
    ///
    /// The kernel must already be set up for the batch shapes. The check runs
    /// on the summed objective `batch_size * loss`: Backward gets
    /// `upstream_grad = 1` and the central difference is scaled by the batch
    /// size. Per-element gradients then keep their natural magnitude instead
    /// of shrinking below the `threshold` floor.
    pub fn check_exhaustive<K: PairLossKernel>(
        &self,
        kernel: &K,
        a: &Tensor,
        b: &Tensor,
        labels: &Tensor,
        input: PairInput,
    ) -> SimLossResult<GradientCheckReport> {
        let base = kernel.forward(a, b, labels)?;
        let shape = a.shape();
        let batch_size = shape.batch() as f32;
        let propagate = match input {
            PairInput::A => Propagate::ONLY_A,
            PairInput::B => Propagate::ONLY_B,
        };
        let grads = kernel.backward(&base.cache, 1.0, propagate)?;
        let analytic = match input {
            PairInput::A => grads.a,
            PairInput::B => grads.b,
        }
        .ok_or_else(|| {
            SimLossError::operation_error(kernel.name(), "backward produced no gradient for the checked input")
        })?;

        let mut probe_a = a.clone();
        let mut probe_b = b.clone();
        let dim = shape.example_len();
        let mut report = GradientCheckReport {
            input,
            checked: 0,
            skipped: 0,
            max_error: 0.0,
            mismatches: Vec::new(),
        };

        for idx in 0..a.numel() {
            if (a.as_slice()[idx] - b.as_slice()[idx]).abs() <= self.kink_margin {
                report.skipped += 1;
                continue;
            }

            let original = probe(&mut probe_a, &mut probe_b, input)[idx];
            probe(&mut probe_a, &mut probe_b, input)[idx] = original + self.stepsize;
            let plus = kernel.forward(&probe_a, &probe_b, labels)?.loss;
            probe(&mut probe_a, &mut probe_b, input)[idx] = original - self.stepsize;
            let minus = kernel.forward(&probe_a, &probe_b, labels)?.loss;
            probe(&mut probe_a, &mut probe_b, input)[idx] = original;

            let numeric = batch_size * (plus - minus) / (2.0 * self.stepsize);
            let analytic = analytic.as_slice()[idx];
            let error = (analytic - numeric).abs();
            let scale = analytic.abs().max(numeric.abs()).max(1.0);

            report.checked += 1;
            report.max_error = report.max_error.max(error);
            if error > self.threshold * scale {
                tracing::warn!(
                    example = idx / dim,
                    channel = idx % dim,
                    analytic,
                    numeric,
                    "gradient mismatch"
                );
                report.mismatches.push(GradientMismatch {
                    example: idx / dim,
                    channel: idx % dim,
                    analytic,
                    numeric,
                });
            }
        }

        tracing::debug!(
            checked = report.checked,
            skipped = report.skipped,
            max_error = report.max_error,
            "gradient check finished"
        );
        Ok(report)
    }
}

fn probe<'t>(a: &'t mut Tensor, b: &'t mut Tensor, input: PairInput) -> &'t mut [f32] {
    match input {
        PairInput::A => a.as_slice_mut(),
        PairInput::B => b.as_slice_mut(),
    }
}

/// Random `[N, C, 1, 1]` pair batch with values uniform in `[-1, 1)` and
/// labels drawn from `{0, 1}`
pub fn uniform_pair_batch(batch_size: usize, dim: usize, seed: u64) -> SimLossResult<(Tensor, Tensor, Tensor)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let shape = Shape::new([batch_size, dim, 1, 1]);
    let a: Vec<f32> = (0..shape.total_elements()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f32> = (0..shape.total_elements()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let labels: Vec<f32> = (0..batch_size).map(|_| f32::from(rng.gen_range(0u8..2))).collect();
    Ok((
        Tensor::from_vec(a, shape)?,
        Tensor::from_vec(b, shape)?,
        Tensor::labels(&labels),
    ))
}
