//! Box geometry operations for the Burn deep learning framework
//!
//! This crate provides the box primitives an anchor-based detector needs during
//! training and that core Burn does not ship: pairwise IoU, center-form
//! conversion, box-delta encoding, and ordered index sets over anchors.

use burn::prelude::*;

mod box_coder;
mod index_set;
mod iou;

// Convenient re-exports
pub use box_coder::{BoxCoder, BoxCoderConfig, CenterForm};
pub use index_set::IndexSet;
pub use iou::{BoxIou, BoxIouConfig};

/// Box operations on `[N, 4]` corner-form tensors
pub trait BoxTensorOps<B: Backend> {
    /// Pairwise IoU against another box set, `[N, M]`
    fn pairwise_iou(self, other: Self) -> Tensor<B, 2>;

    /// Center/size view of the boxes
    fn center_form(self) -> CenterForm<B>;
}

impl<B: Backend> BoxTensorOps<B> for Tensor<B, 2> {
    fn pairwise_iou(self, other: Self) -> Tensor<B, 2> {
        BoxIou::new().forward(self, other)
    }

    fn center_form(self) -> CenterForm<B> {
        CenterForm::from_corners(self)
    }
}
