//! Minimal batch container shared by the loss kernels
//!
//! Inputs and gradients are flat `f32` buffers with `[N, C, H, W]` shape
//! metadata. The pair losses only ever see flat vectors (`H = W = 1`).

pub mod core;

// Re-export main types for convenience
pub use self::core::{Shape, Tensor};
