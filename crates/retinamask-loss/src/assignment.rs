//! Anchor to ground-truth assignment.
//!
//! Every anchor is matched to the annotation it overlaps most, then partitioned
//! by that best IoU:
//!
//! | best IoU                          | role       | class targets            |
//! |-----------------------------------|------------|--------------------------|
//! | `< negative_threshold`            | background | all `0`                  |
//! | `>= positive_threshold`           | foreground | one-hot on the class id  |
//! | in between                        | ignored    | all [`IGNORE_TARGET`]    |
//!
//! The match is recorded for every anchor, but only foreground anchors use it.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Bool, Int, Tensor},
};
use retinamask_ops::{BoxIou, BoxIouConfig, IndexSet};

use crate::focal::IGNORE_TARGET;

/// Configuration for creating an [anchor assigner](AnchorAssigner).
#[derive(Config, Debug)]
pub struct AnchorAssignerConfig {
    /// Anchors whose best IoU falls below this are background. Default: 0.4
    #[config(default = 0.4)]
    pub negative_threshold: f64,
    /// Anchors whose best IoU reaches this are foreground. Default: 0.5
    #[config(default = 0.5)]
    pub positive_threshold: f64,
    /// Overlap measure used for matching.
    #[config(default = "BoxIouConfig::new()")]
    pub iou: BoxIouConfig,
}

impl AnchorAssignerConfig {
    /// Initialize [anchor assigner](AnchorAssigner).
    pub fn init(&self) -> AnchorAssigner {
        self.assertions();
        AnchorAssigner {
            negative_threshold: self.negative_threshold,
            positive_threshold: self.positive_threshold,
            iou: self.iou.init(),
        }
    }

    fn assertions(&self) {
        assert!(
            0.0 <= self.negative_threshold
                && self.negative_threshold <= self.positive_threshold
                && self.positive_threshold <= 1.0,
            "Thresholds for AnchorAssigner must satisfy 0 <= negative <= positive <= 1, got {} and {}",
            self.negative_threshold,
            self.positive_threshold
        );
    }
}

/// Matches anchors to annotations and derives per-class targets.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct AnchorAssigner {
    pub negative_threshold: f64,
    pub positive_threshold: f64,
    pub iou: BoxIou,
}

impl Default for AnchorAssigner {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for AnchorAssigner {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("negative_threshold", &self.negative_threshold)
            .add("positive_threshold", &self.positive_threshold)
            .optional()
    }
}

/// Result of matching one image's anchors against its annotations.
#[derive(Debug, Clone)]
pub struct AnchorAssignment<B: Backend> {
    /// Best IoU of every anchor over all annotations, `[A]`.
    pub iou_max: Tensor<B, 1>,
    /// Index of the annotation achieving `iou_max`, `[A]`.
    pub iou_argmax: Tensor<B, 1, Int>,
    /// Foreground anchors, `[A]`.
    pub positive_mask: Tensor<B, 1, Bool>,
    /// Background anchors, `[A]`.
    pub negative_mask: Tensor<B, 1, Bool>,
    /// Ascending indices of the foreground anchors.
    pub positives: IndexSet<B>,
    /// The matched annotation row of every anchor, `[A, 5]`.
    pub assigned_annotations: Tensor<B, 2>,
    /// Per-class targets in `{-1, 0, 1}`, `[A, C]`.
    pub classification_targets: Tensor<B, 2>,
}

impl<B: Backend> AnchorAssignment<B> {
    /// Number of foreground anchors.
    pub fn num_positive(&self) -> usize {
        self.positives.len()
    }

    /// Matched boxes of every anchor, `[A, 4]`.
    pub fn assigned_boxes(&self) -> Tensor<B, 2> {
        let [num_anchors, _] = self.assigned_annotations.dims();
        self.assigned_annotations
            .clone()
            .slice([0..num_anchors, 0..4])
    }
}

impl AnchorAssigner {
    /// Create a new assigner with default configuration.
    pub fn new() -> Self {
        AnchorAssignerConfig::new().init()
    }

    /// Match anchors against the annotations of a single image.
    ///
    /// Class ids are read from the last annotation column and truncated to
    /// integers; they are expected to lie in `0..num_classes`.
    ///
    /// # Shapes
    ///
    /// - anchors: `[A, 4]`
    /// - annotations: `[M, 5]` as `(x1, y1, x2, y2, class_id)`, `M > 0`
    pub fn assign<B: Backend>(
        &self,
        anchors: Tensor<B, 2>,
        annotations: Tensor<B, 2>,
        num_classes: usize,
    ) -> AnchorAssignment<B> {
        self.assertions(&anchors, &annotations);

        let device = anchors.device();
        let [num_anchors, _] = anchors.dims();
        let [num_annotations, _] = annotations.dims();

        let gt_boxes = annotations.clone().slice([0..num_annotations, 0..4]);
        let iou = self.iou.forward(anchors, gt_boxes);

        let (iou_max, iou_argmax) = iou.max_dim_with_indices(1);
        let iou_max = iou_max.reshape([num_anchors]);
        let iou_argmax = iou_argmax.reshape([num_anchors]);

        let negative_mask = iou_max.clone().lower_elem(self.negative_threshold);
        let positive_mask = iou_max.clone().greater_equal_elem(self.positive_threshold);

        let assigned_annotations = annotations.select(0, iou_argmax.clone());

        let class_ids = assigned_annotations
            .clone()
            .slice([0..num_anchors, 4..5])
            .int()
            .expand([num_anchors, num_classes]);
        let class_columns = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
            .unsqueeze_dim::<2>(0)
            .expand([num_anchors, num_classes]);
        let one_hot = class_ids.equal(class_columns).float();

        let classification_targets =
            Tensor::<B, 2>::full([num_anchors, num_classes], IGNORE_TARGET, &device)
                .mask_fill(
                    negative_mask
                        .clone()
                        .unsqueeze_dim::<2>(1)
                        .expand([num_anchors, num_classes]),
                    0.0,
                )
                .mask_where(
                    positive_mask
                        .clone()
                        .unsqueeze_dim::<2>(1)
                        .expand([num_anchors, num_classes]),
                    one_hot,
                );

        let positives = IndexSet::from_mask(positive_mask.clone());

        AnchorAssignment {
            iou_max,
            iou_argmax,
            positive_mask,
            negative_mask,
            positives,
            assigned_annotations,
            classification_targets,
        }
    }

    fn assertions<B: Backend>(&self, anchors: &Tensor<B, 2>, annotations: &Tensor<B, 2>) {
        let [_, anchor_cols] = anchors.dims();
        let [num_annotations, annotation_cols] = annotations.dims();
        assert_eq!(
            anchor_cols, 4,
            "Anchors must have 4 coordinates per row, got {anchor_cols}"
        );
        assert_eq!(
            annotation_cols, 5,
            "Annotations must have 5 columns per row, got {annotation_cols}"
        );
        assert!(
            num_annotations > 0,
            "Assignment requires at least one annotation"
        );
    }
}
