//! Pairwise Intersection over Union between two box sets.
//!
//! Boxes are rows of `[x1, y1, x2, y2]`. For every pair `(a_i, b_j)`:
//! ```text
//! iw    = max(0, min(a.x2, b.x2) - max(a.x1, b.x1))
//! ih    = max(0, min(a.y2, b.y2) - max(a.y1, b.y1))
//! union = max(area(a) + area(b) - iw * ih, eps)
//! IoU   = iw * ih / union
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

/// Configuration for creating a [pairwise IoU](BoxIou) operator.
#[derive(Config, Debug)]
pub struct BoxIouConfig {
    /// Lower bound of the union area. Default: 1e-8
    #[config(default = 1e-8)]
    pub eps: f64,
}

impl BoxIouConfig {
    /// Initialize [pairwise IoU](BoxIou).
    pub fn init(&self) -> BoxIou {
        self.assertions();
        BoxIou { eps: self.eps }
    }

    fn assertions(&self) {
        assert!(
            self.eps > 0.0,
            "Epsilon for BoxIou must be positive, got {}",
            self.eps
        );
    }
}

/// Pairwise IoU matrix between two ordered box collections.
///
/// Malformed boxes (`x2 < x1`) are not rejected: their intersection clamps to
/// zero and the union floor keeps the ratio finite.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct BoxIou {
    /// Lower bound of the union area.
    pub eps: f64,
}

impl Default for BoxIou {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for BoxIou {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("eps", &self.eps).optional()
    }
}

impl BoxIou {
    /// Create a new IoU operator with default configuration.
    pub fn new() -> Self {
        BoxIouConfig::new().init()
    }

    /// Compute the IoU of every box in `boxes_a` against every box in `boxes_b`.
    ///
    /// Either set may be empty, in which case an empty matrix of the matching
    /// shape is returned.
    ///
    /// # Shapes
    ///
    /// - boxes_a: `[N, 4]`
    /// - boxes_b: `[M, 4]`
    /// - output: `[N, M]`
    pub fn forward<B: Backend>(&self, boxes_a: Tensor<B, 2>, boxes_b: Tensor<B, 2>) -> Tensor<B, 2> {
        self.assertions(&boxes_a, &boxes_b);

        let [n, _] = boxes_a.dims();
        let [m, _] = boxes_b.dims();
        if n == 0 || m == 0 {
            return Tensor::zeros([n, m], &boxes_a.device());
        }

        // Column vectors [N, 1] against row vectors [1, M], broadcast to [N, M].
        let [ax1, ay1, ax2, ay2] = corners(boxes_a);
        let [bx1, by1, bx2, by2] = corners(boxes_b).map(|c| c.reshape([1, m]));

        let area_a = (ax2.clone() - ax1.clone()) * (ay2.clone() - ay1.clone());
        let area_b = (bx2.clone() - bx1.clone()) * (by2.clone() - by1.clone());

        let iw = ax2
            .expand([n, m])
            .min_pair(bx2.expand([n, m]))
            .sub(ax1.expand([n, m]).max_pair(bx1.expand([n, m])))
            .clamp_min(0.0);
        let ih = ay2
            .expand([n, m])
            .min_pair(by2.expand([n, m]))
            .sub(ay1.expand([n, m]).max_pair(by1.expand([n, m])))
            .clamp_min(0.0);

        let intersection = iw * ih;
        let union = (area_a.expand([n, m]) + area_b.expand([n, m]) - intersection.clone())
            .clamp_min(self.eps);

        intersection / union
    }

    fn assertions<B: Backend>(&self, boxes_a: &Tensor<B, 2>, boxes_b: &Tensor<B, 2>) {
        let [_, a_cols] = boxes_a.dims();
        let [_, b_cols] = boxes_b.dims();
        assert!(
            a_cols == 4 && b_cols == 4,
            "Boxes must have 4 coordinates per row, got {a_cols} and {b_cols}"
        );
    }
}

/// Split `[N, 4]` boxes into their `x1, y1, x2, y2` columns, each `[N, 1]`.
pub(crate) fn corners<B: Backend>(boxes: Tensor<B, 2>) -> [Tensor<B, 2>; 4] {
    let [n, _] = boxes.dims();
    [0, 1, 2, 3].map(|i| boxes.clone().slice([0..n, i..i + 1]))
}
