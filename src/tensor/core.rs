//! Core tensor types for pair-loss batches

use std::fmt::{self, Debug, Display};

use crate::error::{SimLossError, SimLossResult};

/// Compile-time shape with const generics for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape<const DIMS: usize> {
    pub dims: [usize; DIMS],
}

impl<const DIMS: usize> Shape<DIMS> {
    pub fn new(dims: [usize; DIMS]) -> Self {
        Self { dims }
    }

    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_valid(&self) -> bool {
        self.dims.iter().all(|&d| d > 0)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }
}

impl Shape<4> {
    pub fn batch(&self) -> usize { self.dims[0] }
    pub fn channels(&self) -> usize { self.dims[1] }
    pub fn height(&self) -> usize { self.dims[2] }
    pub fn width(&self) -> usize { self.dims[3] }

    /// Elements per example (`C * H * W`)
    pub fn example_len(&self) -> usize {
        self.dims[1] * self.dims[2] * self.dims[3]
    }
}

impl<const DIMS: usize> Display for Shape<DIMS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.dims.iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", "))
    }
}

/// Dense `f32` batch in `[N, C, H, W]` layout.
///
/// Pair vectors are stored as `[N, C, 1, 1]`, labels as `[N, 1, 1, 1]`.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape<4>,
}

impl Tensor {
    /// Zero-filled tensor of the given shape
    pub fn zeros(shape: Shape<4>) -> Self {
        Self {
            data: vec![0.0; shape.total_elements()],
            shape,
        }
    }

    /// Create from a flat vector in `[N, C, H, W]` order
    pub fn from_vec(data: Vec<f32>, shape: Shape<4>) -> SimLossResult<Self> {
        if data.len() != shape.total_elements() {
            return Err(SimLossError::InvalidInput(format!(
                "Data length {} doesn't match shape {} ({} elements)",
                data.len(),
                shape,
                shape.total_elements()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Build an `[N, C, 1, 1]` batch from one row per example
    pub fn from_rows(rows: &[Vec<f32>]) -> SimLossResult<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(SimLossError::InvalidInput(format!(
                "Row {} has {} values, expected {}",
                i,
                row.len(),
                dim
            )));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::from_vec(data, Shape::new([rows.len(), dim, 1, 1]))
    }

    /// Build an `[N, 1, 1, 1]` label batch
    pub fn labels(values: &[f32]) -> Self {
        Self {
            data: values.to_vec(),
            shape: Shape::new([values.len(), 1, 1, 1]),
        }
    }

    /// Get tensor shape
    pub fn shape(&self) -> Shape<4> {
        self.shape
    }

    /// Get number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Get data as slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get data as mutable slice
    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Values belonging to example `index`, `None` past the last example
    pub fn example(&self, index: usize) -> Option<&[f32]> {
        if index >= self.shape.batch() {
            return None;
        }
        let len = self.shape.example_len();
        self.data.get(index * len..(index + 1) * len)
    }

    /// One row per example, the inverse of [`Tensor::from_rows`]
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        let len = self.shape.example_len();
        if len == 0 {
            return vec![Vec::new(); self.shape.batch()];
        }
        self.data.chunks(len).map(|c| c.to_vec()).collect()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("size", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_accessors() {
        let shape = Shape::new([512, 2, 1, 1]);
        assert_eq!(shape.batch(), 512);
        assert_eq!(shape.channels(), 2);
        assert_eq!(shape.height(), 1);
        assert_eq!(shape.width(), 1);
        assert_eq!(shape.example_len(), 2);
        assert_eq!(shape.total_elements(), 1024);
        assert!(shape.is_valid());
        assert!(!Shape::new([0, 2, 1, 1]).is_valid());
        assert_eq!(shape.to_string(), "[512, 2, 1, 1]");
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let result = Tensor::from_vec(vec![1.0, 2.0, 3.0], Shape::new([2, 2, 1, 1]));
        assert!(matches!(result, Err(SimLossError::InvalidInput(_))));
    }

    #[test]
    fn test_rows() {
        let t = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(t.shape(), Shape::new([2, 2, 1, 1]));
        assert_eq!(t.example(1), Some(&[3.0, 4.0][..]));
        assert_eq!(t.example(2), None);
        assert_eq!(t.example(usize::MAX), None);
        assert_eq!(t.to_rows(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let ragged = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(ragged.is_err());
    }

    #[test]
    fn test_labels_shape() {
        let labels = Tensor::labels(&[0.0, 1.0, 1.0]);
        assert_eq!(labels.shape(), Shape::new([3, 1, 1, 1]));
        assert_eq!(labels.as_slice(), &[0.0, 1.0, 1.0]);
    }
}
