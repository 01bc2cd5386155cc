//! Synthetic detector outputs and ground truth.
//!
//! Annotations are derived from the anchor grid itself, shifted by a pixel so
//! every annotated object has a clear foreground anchor, and images at the
//! configured interval are left empty.

use burn::{prelude::*, tensor::Distribution};

use crate::config::SyntheticBatchConfig;

/// One batch of fake network outputs together with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticBatch<B: Backend> {
    /// `[B, A, C]` probabilities.
    pub classifications: Tensor<B, 3>,
    /// `[B, A, 4]` deltas.
    pub regressions: Tensor<B, 3>,
    /// `[B, A, H, W]` probabilities.
    pub masks: Tensor<B, 4>,
    /// `[1, A, 4]`
    pub anchors: Tensor<B, 3>,
    /// `B` tensors of `[M_b, 5]`.
    pub bbox_annotations: Vec<Tensor<B, 2>>,
    /// `B` tensors of `[M_b, H, W]`.
    pub mask_annotations: Vec<Tensor<B, 3>>,
}

/// Anchor boxes of a square grid as `[x1, y1, x2, y2]` rows, cell-major.
pub fn anchor_grid(config: &SyntheticBatchConfig) -> Vec<[f32; 4]> {
    let mut anchors = Vec::with_capacity(config.num_anchors());
    for row in 0..config.grid_size {
        for col in 0..config.grid_size {
            let ctr_x = (col as f64 + 0.5) * config.stride;
            let ctr_y = (row as f64 + 0.5) * config.stride;
            for scale in &config.anchor_scales {
                let half = 0.5 * scale * config.stride;
                anchors.push([
                    (ctr_x - half) as f32,
                    (ctr_y - half) as f32,
                    (ctr_x + half) as f32,
                    (ctr_y + half) as f32,
                ]);
            }
        }
    }
    anchors
}

impl<B: Backend> SyntheticBatch<B> {
    /// Generate a batch on `device`. Random tensors draw from the backend's
    /// generator, so call `B::seed` first for reproducible values.
    pub fn generate(config: &SyntheticBatchConfig, device: &B::Device) -> Self {
        let grid = anchor_grid(config);
        let num_anchors = grid.len();
        let [batch_size, num_classes, mask_size] =
            [config.batch_size, config.num_classes, config.mask_size];

        let flat: Vec<f32> = grid.iter().flatten().copied().collect();
        let anchors = Tensor::<B, 1>::from_floats(flat.as_slice(), device)
            .reshape([1, num_anchors, 4]);

        let classifications = Tensor::random(
            [batch_size, num_anchors, num_classes],
            Distribution::Uniform(0.0, 1.0),
            device,
        );
        let regressions = Tensor::random(
            [batch_size, num_anchors, 4],
            Distribution::Normal(0.0, 0.5),
            device,
        );
        let masks = Tensor::random(
            [batch_size, num_anchors, mask_size, mask_size],
            Distribution::Uniform(0.0, 1.0),
            device,
        );

        let mut bbox_annotations = Vec::with_capacity(batch_size);
        let mut mask_annotations = Vec::with_capacity(batch_size);
        for image in 0..batch_size {
            let empty = config.empty_image_interval > 0
                && image % config.empty_image_interval == config.empty_image_interval - 1;
            let count = if empty || num_anchors == 0 {
                0
            } else {
                config.annotations_per_image
            };

            let rows: Vec<f32> = (0..count)
                .flat_map(|k| {
                    let [x1, y1, x2, y2] = grid[(image * 7 + k * 13) % num_anchors];
                    let class_id = ((image + k) % num_classes.max(1)) as f32;
                    [x1 + 1.0, y1 + 1.0, x2 + 1.0, y2 + 1.0, class_id]
                })
                .collect();

            bbox_annotations.push(if count == 0 {
                Tensor::zeros([0, 5], device)
            } else {
                Tensor::<B, 1>::from_floats(rows.as_slice(), device).reshape([count, 5])
            });
            mask_annotations.push(Tensor::random(
                [count, mask_size, mask_size],
                Distribution::Bernoulli(0.5),
                device,
            ));
        }

        Self {
            classifications,
            regressions,
            masks,
            anchors,
            bbox_annotations,
            mask_annotations,
        }
    }

    /// Total number of annotations across the batch.
    pub fn num_annotations(&self) -> usize {
        self.bbox_annotations.iter().map(|b| b.dims()[0]).sum()
    }
}
