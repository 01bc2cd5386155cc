//! Focal loss over per-anchor, per-class probabilities.
//!
//! Down-weights well-classified cells so the rare foreground anchors are not
//! drowned out by the dense background. For a probability `p` clamped to
//! `[eps, 1 - eps]` and a target `t`:
//! ```text
//! alpha_t = alpha          if t == 1 else 1 - alpha
//! w       = (1 - p)^gamma  if t == 1 else p^gamma
//! bce     = -(t * ln(p) + (1 - t) * ln(1 - p))
//! loss    = alpha_t * w * bce
//! ```
//! Cells whose target is [`IGNORE_TARGET`] contribute exactly zero.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

/// Target value of a cell excluded from the loss.
pub const IGNORE_TARGET: f64 = -1.0;

/// Configuration for creating a [focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Weight of foreground cells; background cells get `1 - alpha`. Default: 0.25
    #[config(default = 0.25)]
    pub alpha: f64,
    /// Focusing exponent. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Probabilities are clamped to `[eps, 1 - eps]`. Default: 1e-4
    #[config(default = 1e-4)]
    pub eps: f64,
}

impl FocalLossConfig {
    /// Initialize [focal loss](FocalLoss).
    pub fn init(&self) -> FocalLoss {
        self.assertions();
        FocalLoss {
            alpha: self.alpha,
            gamma: self.gamma,
            eps: self.eps,
        }
    }

    fn assertions(&self) {
        assert!(
            (0.0..=1.0).contains(&self.alpha),
            "Alpha for FocalLoss must be in [0, 1], got {}",
            self.alpha
        );
        assert!(
            self.gamma >= 0.0,
            "Gamma for FocalLoss must be non-negative, got {}",
            self.gamma
        );
        assert!(
            self.eps > 0.0 && self.eps < 0.5,
            "Epsilon for FocalLoss must be in (0, 0.5), got {}",
            self.eps
        );
    }
}

/// Focal loss on sigmoid probabilities with ignorable cells.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct FocalLoss {
    pub alpha: f64,
    pub gamma: f64,
    /// Probability clamp.
    pub eps: f64,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for FocalLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("alpha", &self.alpha)
            .add("gamma", &self.gamma)
            .add("eps", &self.eps)
            .optional()
    }
}

impl FocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        FocalLossConfig::new().init()
    }

    /// Sum of all cell losses divided by the number of positive anchors.
    ///
    /// The normalizer is floored at 1, so an image without positives reports
    /// the plain sum of its background terms.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[...dims]`
    /// - targets: `[...dims]` with values in `{-1, 0, 1}`
    /// - output: `[1]`
    pub fn forward<const D: usize, B: Backend>(
        &self,
        probabilities: Tensor<B, D>,
        targets: Tensor<B, D>,
        num_positive: usize,
    ) -> Tensor<B, 1> {
        let normalizer = num_positive.max(1) as f64;
        self.forward_no_reduction(probabilities, targets)
            .sum()
            .div_scalar(normalizer)
    }

    /// Per-cell focal loss, zero where the target is [`IGNORE_TARGET`].
    ///
    /// # Shapes
    ///
    /// - probabilities: `[...dims]`
    /// - targets: `[...dims]`
    /// - output: `[...dims]`
    pub fn forward_no_reduction<const D: usize, B: Backend>(
        &self,
        probabilities: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.assertions(&probabilities, &targets);

        let p = probabilities.clamp(self.eps, 1.0 - self.eps);
        let p_complement = p.clone().neg().add_scalar(1.0);

        let foreground = targets.clone().equal_elem(1.0);
        let ignored = targets.clone().equal_elem(IGNORE_TARGET);

        let alpha_factor = Tensor::ones_like(&p)
            .mul_scalar(1.0 - self.alpha)
            .mask_fill(foreground.clone(), self.alpha);
        let focal_weight = p
            .clone()
            .mask_where(foreground, p_complement.clone())
            .powf_scalar(self.gamma)
            * alpha_factor;

        let target_complement = targets.clone().neg().add_scalar(1.0);
        let bce = -(targets * p.log() + target_complement * p_complement.log());

        (focal_weight * bce).mask_fill(ignored, 0.0)
    }

    fn assertions<const D: usize, B: Backend>(
        &self,
        probabilities: &Tensor<B, D>,
        targets: &Tensor<B, D>,
    ) {
        let pred_dims = probabilities.dims();
        let target_dims = targets.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of probabilities ({pred_dims:?}) must match targets ({target_dims:?})"
        );
    }
}
