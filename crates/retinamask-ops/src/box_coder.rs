//! Box-delta encoding against anchor reference frames.
//!
//! A box matched to an anchor is expressed as offsets relative to the anchor's
//! center and size, each divided by a fixed per-component scale:
//! ```text
//! dx = (g.cx - a.cx) / a.w / scale[0]
//! dy = (g.cy - a.cy) / a.h / scale[1]
//! dw = ln(max(g.w, min_size) / a.w) / scale[2]
//! dh = ln(max(g.h, min_size) / a.h) / scale[3]
//! ```
//! The box center is taken from the unclamped size; only the log terms see the
//! `min_size` floor.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::iou::corners;

/// Center/size view of a `[N, 4]` corner-form box collection.
///
/// Every field is a `[N, 1]` column so the components can be concatenated back
/// into `[N, 4]` rows.
#[derive(Debug, Clone)]
pub struct CenterForm<B: Backend> {
    pub widths: Tensor<B, 2>,
    pub heights: Tensor<B, 2>,
    pub ctr_x: Tensor<B, 2>,
    pub ctr_y: Tensor<B, 2>,
}

impl<B: Backend> CenterForm<B> {
    /// Convert `[x1, y1, x2, y2]` rows.
    pub fn from_corners(boxes: Tensor<B, 2>) -> Self {
        let [x1, y1, x2, y2] = corners(boxes);
        let widths = x2 - x1.clone();
        let heights = y2 - y1.clone();
        let ctr_x = x1 + widths.clone().mul_scalar(0.5);
        let ctr_y = y1 + heights.clone().mul_scalar(0.5);

        Self {
            widths,
            heights,
            ctr_x,
            ctr_y,
        }
    }
}

/// Configuration for creating a [box coder](BoxCoder).
#[derive(Config, Debug)]
pub struct BoxCoderConfig {
    /// Per-component normalization of `(dx, dy, dw, dh)`. Default: `[0.1, 0.1, 0.2, 0.2]`
    #[config(default = "[0.1, 0.1, 0.2, 0.2]")]
    pub scale: [f64; 4],
    /// Floor applied to target widths and heights before the log. Default: 1.0
    #[config(default = 1.0)]
    pub min_size: f64,
}

impl BoxCoderConfig {
    /// Initialize [box coder](BoxCoder).
    pub fn init(&self) -> BoxCoder {
        self.assertions();
        let [dx_scale, dy_scale, dw_scale, dh_scale] = self.scale;
        BoxCoder {
            dx_scale,
            dy_scale,
            dw_scale,
            dh_scale,
            min_size: self.min_size,
        }
    }

    fn assertions(&self) {
        assert!(
            self.scale.iter().all(|s| *s > 0.0),
            "Scale for BoxCoder must be positive, got {:?}",
            self.scale
        );
        assert!(
            self.min_size > 0.0,
            "Minimum size for BoxCoder must be positive, got {}",
            self.min_size
        );
    }
}

/// Encodes matched boxes as normalized deltas relative to their anchors.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct BoxCoder {
    pub dx_scale: f64,
    pub dy_scale: f64,
    pub dw_scale: f64,
    pub dh_scale: f64,
    /// Floor applied to target widths and heights before the log.
    pub min_size: f64,
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for BoxCoder {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("dx_scale", &self.dx_scale)
            .add("dy_scale", &self.dy_scale)
            .add("dw_scale", &self.dw_scale)
            .add("dh_scale", &self.dh_scale)
            .add("min_size", &self.min_size)
            .optional()
    }
}

impl BoxCoder {
    /// Create a new box coder with default configuration.
    pub fn new() -> Self {
        BoxCoderConfig::new().init()
    }

    /// Encode `boxes[i]` relative to `anchors[i]`.
    ///
    /// Anchors are expected to have positive width and height.
    ///
    /// # Shapes
    ///
    /// - anchors: `[N, 4]`
    /// - boxes: `[N, 4]`
    /// - output: `[N, 4]` as `(dx, dy, dw, dh)`
    pub fn encode<B: Backend>(&self, anchors: Tensor<B, 2>, boxes: Tensor<B, 2>) -> Tensor<B, 2> {
        self.assertions(&anchors, &boxes);

        let anchor = CenterForm::from_corners(anchors);
        let target = CenterForm::from_corners(boxes);

        let target_widths = target.widths.clamp_min(self.min_size);
        let target_heights = target.heights.clamp_min(self.min_size);

        let dx = (target.ctr_x - anchor.ctr_x) / anchor.widths.clone();
        let dy = (target.ctr_y - anchor.ctr_y) / anchor.heights.clone();
        let dw = (target_widths / anchor.widths).log();
        let dh = (target_heights / anchor.heights).log();

        Tensor::cat(
            vec![
                dx.div_scalar(self.dx_scale),
                dy.div_scalar(self.dy_scale),
                dw.div_scalar(self.dw_scale),
                dh.div_scalar(self.dh_scale),
            ],
            1,
        )
    }

    fn assertions<B: Backend>(&self, anchors: &Tensor<B, 2>, boxes: &Tensor<B, 2>) {
        let anchor_dims = anchors.dims();
        let box_dims = boxes.dims();
        assert_eq!(
            anchor_dims, box_dims,
            "Shape of anchors ({anchor_dims:?}) must match boxes ({box_dims:?})"
        );
        assert_eq!(
            anchor_dims[1], 4,
            "Boxes must have 4 coordinates per row, got {}",
            anchor_dims[1]
        );
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn center_form_converts_corner_boxes() {
        let device = Default::default();
        let boxes = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.0, 0.0, 10.0, 4.0], [2.0, 3.0, 6.0, 11.0]]),
            &device,
        );

        let center = CenterForm::from_corners(boxes);
        let stacked = Tensor::cat(
            vec![center.widths, center.heights, center.ctr_x, center.ctr_y],
            1,
        );

        let expected = TensorData::from([[10.0, 4.0, 5.0, 2.0], [4.0, 8.0, 4.0, 7.0]]);
        stacked
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn box_coder_encode_identical_boxes_returns_zero_deltas() {
        let device = Default::default();
        let coder = BoxCoder::new();

        let anchors = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.0, 0.0, 16.0, 16.0], [8.0, 4.0, 40.0, 20.0]]),
            &device,
        );

        let deltas = coder.encode(anchors.clone(), anchors);

        let expected = TensorData::from([[0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]]);
        deltas
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::absolute(1e-6));
    }

    #[test]
    fn box_coder_encode_applies_scale_normalization() {
        let device = Default::default();
        let coder = BoxCoder::new();

        let anchors =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[0.0, 0.0, 10.0, 10.0]]), &device);
        // Shifted by (2, -1), width doubled, height unchanged.
        let boxes =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[-3.0, -1.0, 17.0, 9.0]]), &device);

        let deltas = coder.encode(anchors, boxes);

        let expected = TensorData::from([[
            (2.0 / 10.0) / 0.1,
            (-1.0 / 10.0) / 0.1,
            2.0_f32.ln() / 0.2,
            0.0,
        ]]);
        deltas
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::relative(1e-5));
    }

    #[test]
    fn box_coder_encode_clamps_degenerate_target_size() {
        let device = Default::default();
        let coder = BoxCoder::new();

        let anchors =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[0.0, 0.0, 4.0, 4.0]]), &device);
        // Zero-width, inverted-height target: log terms see the floor of 1.
        let boxes =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[2.0, 3.0, 2.0, 1.0]]), &device);

        let deltas = coder.encode(anchors, boxes);

        // Center is computed from the raw size: cx = 2, cy = 3 + (-2) / 2 = 2.
        let expected = TensorData::from([[0.0, 0.0, 0.25_f32.ln() / 0.2, 0.25_f32.ln() / 0.2]]);
        deltas
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::relative(1e-5));
    }

    #[test]
    #[should_panic = "Scale for BoxCoder must be positive"]
    fn box_coder_config_zero_scale_panics() {
        let _coder = BoxCoderConfig::new()
            .with_scale([0.1, 0.0, 0.2, 0.2])
            .init();
    }

    #[test]
    #[should_panic = "Shape of anchors"]
    fn box_coder_encode_mismatched_rows_panics() {
        let device = Default::default();
        let coder = BoxCoder::new();

        let anchors = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let boxes = Tensor::<TestBackend, 2>::zeros([2, 4], &device);

        let _deltas = coder.encode(anchors, boxes);
    }
}
