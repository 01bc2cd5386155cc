//! Ordered anchor index sets.
//!
//! Subsets of anchors (positives, negatives) are carried as the ascending list
//! of row indices satisfying a predicate, and applied with `select` along the
//! anchor axis. Indices stay on the tensor's device.

use burn::tensor::{backend::Backend, Bool, Int, Tensor};

/// Ascending row indices for which a boolean predicate holds.
#[derive(Debug, Clone)]
pub struct IndexSet<B: Backend> {
    indices: Tensor<B, 1, Int>,
    len: usize,
}

impl<B: Backend> IndexSet<B> {
    /// Collect the positions of `true` entries.
    pub fn from_mask(mask: Tensor<B, 1, Bool>) -> Self {
        let device = mask.device();
        // `nonzero` yields no tensor at all when every entry is false.
        let indices = mask
            .nonzero()
            .into_iter()
            .next()
            .unwrap_or_else(|| Tensor::empty([0], &device));
        let [len] = indices.dims();
        Self { indices, len }
    }

    /// Number of selected rows.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The selected row indices, `[len]`.
    pub fn indices(&self) -> Tensor<B, 1, Int> {
        self.indices.clone()
    }

    /// Gather the selected rows of a float tensor along its first axis.
    pub fn select<const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.select(0, self.indices.clone())
    }

    /// Gather the selected entries of an integer vector.
    pub fn select_int(&self, tensor: Tensor<B, 1, Int>) -> Tensor<B, 1, Int> {
        tensor.select(0, self.indices.clone())
    }

    /// Read the indices back to the host.
    pub fn to_vec(&self) -> Vec<usize> {
        self.indices
            .clone()
            .into_data()
            .iter::<i64>()
            .map(|i| i as usize)
            .collect()
    }
}
