//! Multi-task training loss for anchor-based detectors with a mask head.
//!
//! Given per-anchor class probabilities, box deltas and mask probabilities for a
//! batch of images, [`DetectionLoss`] matches a shared anchor set to each
//! image's annotations and returns three batch-mean scalars:
//!
//! - **classification**: [`FocalLoss`] over every non-ignored anchor/class cell,
//!   normalized by the number of foreground anchors
//! - **regression**: [`SmoothL1Loss`] between predicted deltas and the encoded
//!   matched boxes, averaged over foreground anchors
//! - **mask**: [`MaskLoss`] binary cross entropy between the predicted masks of
//!   foreground anchors and their matched instance masks
//!
//! Anchor roles are decided by [`AnchorAssigner`]: background below the
//! negative threshold, foreground at or above the positive threshold, ignored
//! in between.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, prelude::*};
//! use retinamask_loss::{DetectionLossConfig, FocalLossConfig};
//!
//! type B = NdArray;
//!
//! let device = Default::default();
//! let loss = DetectionLossConfig::new()
//!     .with_focal(FocalLossConfig::new().with_gamma(1.5))
//!     .init();
//!
//! let anchors = Tensor::<B, 3>::from_floats([[[0.0, 0.0, 10.0, 10.0]]], &device);
//! let classifications = Tensor::<B, 3>::full([1, 1, 3], 0.5, &device);
//! let regressions = Tensor::<B, 3>::zeros([1, 1, 4], &device);
//! let masks = Tensor::<B, 4>::full([1, 1, 8, 8], 0.5, &device);
//!
//! let boxes = vec![Tensor::<B, 2>::from_floats([[0.0, 0.0, 10.0, 10.0, 2.0]], &device)];
//! let gt_masks = vec![Tensor::<B, 3>::ones([1, 8, 8], &device)];
//!
//! let output = loss
//!     .forward(classifications, regressions, masks, anchors, &boxes, &gt_masks)
//!     .expect("shapes are consistent");
//! assert_eq!(output.per_image.len(), 1);
//! ```

mod assignment;
mod detection;
mod error;
mod focal;
mod mask;
mod smooth_l1;

pub use assignment::{AnchorAssigner, AnchorAssignerConfig, AnchorAssignment};
pub use detection::{
    DetectionLoss, DetectionLossConfig, DetectionLossOutput, ImageAnnotations, ImageLoss,
    ImagePredictions, LossWeightsConfig,
};
pub use error::{DetectionLossError, DetectionLossResult};
pub use focal::{FocalLoss, FocalLossConfig, IGNORE_TARGET};
pub use mask::{MaskLoss, MaskLossConfig};
pub use smooth_l1::{SmoothL1Loss, SmoothL1LossConfig};

#[cfg(test)]
mod tests;
