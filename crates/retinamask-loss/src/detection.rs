//! Multi-task detection loss: classification, box regression and instance masks.
//!
//! Every image is scored independently against the shared anchor set, then the
//! three per-image scalars are averaged over the batch. Images without
//! annotations contribute zero to all three terms.

use std::collections::HashMap;

use burn::{
    nn::loss::Reduction,
    prelude::*,
    tensor::{backend::Backend, cast::ToElement, Tensor},
};
use retinamask_ops::{BoxCoder, BoxCoderConfig};
use tracing::{debug, enabled, trace, Level};

use crate::{
    assignment::{AnchorAssigner, AnchorAssignerConfig, AnchorAssignment},
    error::{DetectionLossError, DetectionLossResult},
    focal::{FocalLoss, FocalLossConfig},
    mask::{MaskLoss, MaskLossConfig},
    smooth_l1::{SmoothL1Loss, SmoothL1LossConfig},
};

/// Weights used when folding the three terms into a single training objective.
#[derive(Config, Debug)]
pub struct LossWeightsConfig {
    #[config(default = 1.0)]
    pub classification: f64,
    #[config(default = 1.0)]
    pub regression: f64,
    #[config(default = 1.0)]
    pub mask: f64,
}

/// Configuration for creating a [detection loss](DetectionLoss).
#[derive(Config, Debug)]
pub struct DetectionLossConfig {
    /// Anchor matching thresholds.
    #[config(default = "AnchorAssignerConfig::new()")]
    pub assigner: AnchorAssignerConfig,
    /// Classification term.
    #[config(default = "FocalLossConfig::new()")]
    pub focal: FocalLossConfig,
    /// Regression term.
    #[config(default = "SmoothL1LossConfig::new()")]
    pub smooth_l1: SmoothL1LossConfig,
    /// Regression target encoding.
    #[config(default = "BoxCoderConfig::new()")]
    pub box_coder: BoxCoderConfig,
    /// Mask term.
    #[config(default = "MaskLossConfig::new()")]
    pub mask: MaskLossConfig,
    /// Only used by [`DetectionLossOutput::weighted_total`].
    #[config(default = "LossWeightsConfig::new()")]
    pub weights: LossWeightsConfig,
}

impl DetectionLossConfig {
    /// Initialize [detection loss](DetectionLoss).
    pub fn init(&self) -> DetectionLoss {
        DetectionLoss {
            assigner: self.assigner.init(),
            focal: self.focal.init(),
            smooth_l1: self.smooth_l1.init(),
            box_coder: self.box_coder.init(),
            mask: self.mask.init(),
        }
    }
}

/// Detection loss over a batch of images sharing one anchor set.
#[derive(Module, Clone, Debug)]
pub struct DetectionLoss {
    pub assigner: AnchorAssigner,
    pub focal: FocalLoss,
    pub smooth_l1: SmoothL1Loss,
    pub box_coder: BoxCoder,
    pub mask: MaskLoss,
}

impl Default for DetectionLoss {
    fn default() -> Self {
        Self::new()
    }
}

/// Network outputs for a single image.
#[derive(Debug, Clone)]
pub struct ImagePredictions<B: Backend> {
    /// Class probabilities, `[A, C]`.
    pub classification: Tensor<B, 2>,
    /// Box deltas, `[A, 4]`.
    pub regression: Tensor<B, 2>,
    /// Mask probabilities, `[A, H, W]`.
    pub masks: Tensor<B, 3>,
}

/// Ground truth for a single image.
#[derive(Debug, Clone)]
pub struct ImageAnnotations<B: Backend> {
    /// `(x1, y1, x2, y2, class_id)` rows, `[M, 5]`. `M` may be zero.
    pub boxes: Tensor<B, 2>,
    /// Binary masks parallel to `boxes`, `[M, H, W]`.
    pub masks: Tensor<B, 3>,
}

/// The three loss terms of one image, each `[1]`.
#[derive(Debug, Clone)]
pub struct ImageLoss<B: Backend> {
    pub classification: Tensor<B, 1>,
    pub regression: Tensor<B, 1>,
    pub mask: Tensor<B, 1>,
}

impl<B: Backend> ImageLoss<B> {
    /// Neutral contribution of an image without annotations.
    pub fn zeros(device: &B::Device) -> Self {
        Self {
            classification: Tensor::zeros([1], device),
            regression: Tensor::zeros([1], device),
            mask: Tensor::zeros([1], device),
        }
    }
}

/// Batch means of the three terms plus the per-image values they came from.
#[derive(Debug, Clone)]
pub struct DetectionLossOutput<B: Backend> {
    pub classification: Tensor<B, 1>,
    pub regression: Tensor<B, 1>,
    pub mask: Tensor<B, 1>,
    /// Per-image terms in batch order.
    pub per_image: Vec<ImageLoss<B>>,
}

impl<B: Backend> DetectionLossOutput<B> {
    /// Weighted sum of the three batch means.
    pub fn weighted_total(&self, weights: &LossWeightsConfig) -> Tensor<B, 1> {
        self.classification.clone().mul_scalar(weights.classification)
            + self.regression.clone().mul_scalar(weights.regression)
            + self.mask.clone().mul_scalar(weights.mask)
    }

    /// Read the batch means back to the host for monitoring.
    pub fn scalars(&self) -> HashMap<String, f64> {
        let mut loss_dict = HashMap::new();
        loss_dict.insert(
            "classification".to_owned(),
            self.classification.clone().into_scalar().to_f64(),
        );
        loss_dict.insert(
            "regression".to_owned(),
            self.regression.clone().into_scalar().to_f64(),
        );
        loss_dict.insert("mask".to_owned(), self.mask.clone().into_scalar().to_f64());
        loss_dict
    }
}

impl DetectionLoss {
    /// Create a new detection loss with default configuration.
    pub fn new() -> Self {
        DetectionLossConfig::new().init()
    }

    /// Match anchors against one image's annotations.
    ///
    /// # Shapes
    ///
    /// - anchors: `[A, 4]`
    /// - annotations: `[M, 5]`, `M > 0`
    pub fn assign<B: Backend>(
        &self,
        anchors: Tensor<B, 2>,
        annotations: Tensor<B, 2>,
        num_classes: usize,
    ) -> AnchorAssignment<B> {
        self.assigner.assign(anchors, annotations, num_classes)
    }

    /// Compute the three loss terms of a single image.
    ///
    /// # Shapes
    ///
    /// - predictions: see [`ImagePredictions`]
    /// - anchors: `[A, 4]`
    /// - annotations: see [`ImageAnnotations`]
    ///
    /// # Errors
    ///
    /// Returns a [`DetectionLossError`] when the inputs disagree on shape or an
    /// annotation carries an out-of-range class id.
    pub fn forward_image<B: Backend>(
        &self,
        predictions: ImagePredictions<B>,
        anchors: Tensor<B, 2>,
        annotations: ImageAnnotations<B>,
    ) -> DetectionLossResult<ImageLoss<B>> {
        validate_anchors(&anchors)?;
        self.image_loss(0, predictions, anchors, annotations)
    }

    /// Compute the batch loss with batch-shared anchors.
    ///
    /// # Shapes
    ///
    /// - classifications: `[B, A, C]` probabilities
    /// - regressions: `[B, A, 4]`
    /// - masks: `[B, A, H, W]` probabilities
    /// - anchors: `[1, A, 4]`
    /// - bbox_annotations: `B` tensors of `[M_b, 5]`
    /// - mask_annotations: `B` tensors of `[M_b, H, W]`
    ///
    /// # Errors
    ///
    /// See [`DetectionLoss::forward_with_anchors`].
    pub fn forward<B: Backend>(
        &self,
        classifications: Tensor<B, 3>,
        regressions: Tensor<B, 3>,
        masks: Tensor<B, 4>,
        anchors: Tensor<B, 3>,
        bbox_annotations: &[Tensor<B, 2>],
        mask_annotations: &[Tensor<B, 3>],
    ) -> DetectionLossResult<DetectionLossOutput<B>> {
        let [anchor_batch, num_anchors, coords] = anchors.dims();
        if anchor_batch != 1 {
            return Err(DetectionLossError::InvalidShape {
                tensor: "anchors",
                expected: "[1, A, 4]",
                actual: anchors.dims().to_vec(),
            });
        }

        self.forward_with_anchors(
            classifications,
            regressions,
            masks,
            anchors.reshape([num_anchors, coords]),
            bbox_annotations,
            mask_annotations,
        )
    }

    /// Compute the batch loss with anchors given as `[A, 4]`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionLossError::EmptyBatch`] for a batch of zero images,
    /// and a shape error when the predictions, anchors and annotation lists
    /// disagree.
    pub fn forward_with_anchors<B: Backend>(
        &self,
        classifications: Tensor<B, 3>,
        regressions: Tensor<B, 3>,
        masks: Tensor<B, 4>,
        anchors: Tensor<B, 2>,
        bbox_annotations: &[Tensor<B, 2>],
        mask_annotations: &[Tensor<B, 3>],
    ) -> DetectionLossResult<DetectionLossOutput<B>> {
        validate_anchors(&anchors)?;

        let [batch_size, cls_anchors, num_classes] = classifications.dims();
        let [reg_batch, reg_anchors, reg_coords] = regressions.dims();
        let [mask_batch, mask_anchors, height, width] = masks.dims();
        if batch_size == 0 {
            return Err(DetectionLossError::EmptyBatch);
        }
        check_batch_size("regressions", batch_size, reg_batch)?;
        check_batch_size("masks", batch_size, mask_batch)?;
        check_batch_size("bbox_annotations", batch_size, bbox_annotations.len())?;
        check_batch_size("mask_annotations", batch_size, mask_annotations.len())?;

        let mut per_image = Vec::with_capacity(batch_size);
        for (image, (boxes, gt_masks)) in bbox_annotations
            .iter()
            .zip(mask_annotations.iter())
            .enumerate()
        {
            let predictions = ImagePredictions {
                classification: classifications
                    .clone()
                    .slice([image..image + 1])
                    .reshape([cls_anchors, num_classes]),
                regression: regressions
                    .clone()
                    .slice([image..image + 1])
                    .reshape([reg_anchors, reg_coords]),
                masks: masks
                    .clone()
                    .slice([image..image + 1])
                    .reshape([mask_anchors, height, width]),
            };
            let annotations = ImageAnnotations {
                boxes: boxes.clone(),
                masks: gt_masks.clone(),
            };

            per_image.push(self.image_loss(image, predictions, anchors.clone(), annotations)?);
        }

        let output = DetectionLossOutput {
            classification: batch_mean(per_image.iter().map(|l| l.classification.clone())),
            regression: batch_mean(per_image.iter().map(|l| l.regression.clone())),
            mask: batch_mean(per_image.iter().map(|l| l.mask.clone())),
            per_image,
        };

        if enabled!(Level::DEBUG) {
            let scalars = output.scalars();
            debug!(
                batch_size,
                classification = scalars["classification"],
                regression = scalars["regression"],
                mask = scalars["mask"],
                "Batch detection loss"
            );
        }

        Ok(output)
    }

    fn image_loss<B: Backend>(
        &self,
        image: usize,
        predictions: ImagePredictions<B>,
        anchors: Tensor<B, 2>,
        annotations: ImageAnnotations<B>,
    ) -> DetectionLossResult<ImageLoss<B>> {
        let num_classes = validate_image(image, &predictions, &anchors, &annotations)?;

        let [num_annotations, _] = annotations.boxes.dims();
        if num_annotations == 0 {
            debug!(image, "Image has no annotations, contributing zero loss");
            return Ok(ImageLoss::zeros(&anchors.device()));
        }
        validate_class_ids(image, &annotations.boxes, num_classes)?;

        let ImagePredictions {
            classification,
            regression,
            masks,
        } = predictions;

        let assignment = self.assign(anchors.clone(), annotations.boxes, num_classes);
        let num_positive = assignment.num_positive();
        trace!(image, num_positive, "Assigned anchors");

        let classification = self.focal.forward(
            classification,
            assignment.classification_targets.clone(),
            num_positive,
        );

        let positives = &assignment.positives;
        if positives.is_empty() {
            let device = anchors.device();
            return Ok(ImageLoss {
                classification,
                regression: Tensor::zeros([1], &device),
                mask: Tensor::zeros([1], &device),
            });
        }

        let regression_targets = self.box_coder.encode(
            positives.select(anchors),
            positives.select(assignment.assigned_boxes()),
        );
        let regression = self.smooth_l1.forward(
            positives.select(regression),
            regression_targets,
            Reduction::Mean,
        );

        let matched = positives.select_int(assignment.iou_argmax.clone());
        let mask = self.mask.forward(
            positives.select(masks),
            annotations.masks.select(0, matched),
        );

        Ok(ImageLoss {
            classification,
            regression,
            mask,
        })
    }
}

fn batch_mean<B: Backend>(values: impl Iterator<Item = Tensor<B, 1>>) -> Tensor<B, 1> {
    Tensor::cat(values.collect(), 0).mean()
}

fn check_batch_size(tensor: &'static str, expected: usize, actual: usize) -> DetectionLossResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DetectionLossError::BatchSizeMismatch {
            tensor,
            expected,
            actual,
        })
    }
}

fn check_anchor_count(
    tensor: &'static str,
    expected: usize,
    actual: usize,
) -> DetectionLossResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DetectionLossError::AnchorCountMismatch {
            tensor,
            expected,
            actual,
        })
    }
}

fn validate_anchors<B: Backend>(anchors: &Tensor<B, 2>) -> DetectionLossResult<()> {
    let [num_anchors, coords] = anchors.dims();
    if coords != 4 {
        return Err(DetectionLossError::InvalidShape {
            tensor: "anchors",
            expected: "[A, 4]",
            actual: anchors.dims().to_vec(),
        });
    }
    if num_anchors == 0 {
        return Err(DetectionLossError::EmptyAnchorSet);
    }
    Ok(())
}

/// Check one image's tensors against the anchor set and return the class count.
fn validate_image<B: Backend>(
    image: usize,
    predictions: &ImagePredictions<B>,
    anchors: &Tensor<B, 2>,
    annotations: &ImageAnnotations<B>,
) -> DetectionLossResult<usize> {
    let [num_anchors, _] = anchors.dims();

    let [cls_anchors, num_classes] = predictions.classification.dims();
    check_anchor_count("classification", num_anchors, cls_anchors)?;

    let [reg_anchors, reg_coords] = predictions.regression.dims();
    check_anchor_count("regression", num_anchors, reg_anchors)?;
    if reg_coords != 4 {
        return Err(DetectionLossError::InvalidShape {
            tensor: "regression",
            expected: "[A, 4]",
            actual: predictions.regression.dims().to_vec(),
        });
    }

    let [mask_anchors, height, width] = predictions.masks.dims();
    check_anchor_count("masks", num_anchors, mask_anchors)?;

    let [num_boxes, box_cols] = annotations.boxes.dims();
    if num_boxes > 0 && box_cols != 5 {
        return Err(DetectionLossError::InvalidShape {
            tensor: "bbox_annotations",
            expected: "[M, 5]",
            actual: annotations.boxes.dims().to_vec(),
        });
    }

    let [num_masks, gt_height, gt_width] = annotations.masks.dims();
    if num_boxes != num_masks {
        return Err(DetectionLossError::AnnotationCountMismatch {
            image,
            boxes: num_boxes,
            masks: num_masks,
        });
    }
    if num_boxes > 0 && [gt_height, gt_width] != [height, width] {
        return Err(DetectionLossError::MaskShapeMismatch {
            image,
            predicted: [height, width],
            annotated: [gt_height, gt_width],
        });
    }

    Ok(num_classes)
}

fn validate_class_ids<B: Backend>(
    image: usize,
    boxes: &Tensor<B, 2>,
    num_classes: usize,
) -> DetectionLossResult<()> {
    let [num_boxes, _] = boxes.dims();
    let class_ids = boxes.clone().slice([0..num_boxes, 4..5]).into_data();

    for class_id in class_ids.iter::<f64>() {
        // Ids are truncated toward zero when cast; NaN is never in range.
        if !(0.0..num_classes as f64).contains(&class_id.trunc()) {
            return Err(DetectionLossError::ClassOutOfRange {
                image,
                class_id: class_id.trunc() as i64,
                num_classes,
            });
        }
    }
    Ok(())
}
