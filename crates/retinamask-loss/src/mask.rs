//! Binary cross entropy between predicted and ground-truth instance masks.
//!
//! For a predicted pixel probability `p` clamped to `[eps, 1 - eps]` and a
//! binary target `t`:
//! ```text
//! loss = -(t * ln(p) + (1 - t) * ln(1 - p))
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

/// Configuration for creating a [mask loss](MaskLoss).
#[derive(Config, Debug)]
pub struct MaskLossConfig {
    /// Predicted mask probabilities are clamped to `[eps, 1 - eps]`. Default: 1e-4
    #[config(default = 1e-4)]
    pub eps: f64,
}

impl MaskLossConfig {
    /// Initialize [mask loss](MaskLoss).
    pub fn init(&self) -> MaskLoss {
        self.assertions();
        MaskLoss { eps: self.eps }
    }

    fn assertions(&self) {
        assert!(
            self.eps > 0.0 && self.eps < 0.5,
            "Epsilon for MaskLoss must be in (0, 0.5), got {}",
            self.eps
        );
    }
}

/// Pixel-wise binary cross entropy between predicted mask probabilities and
/// binary ground-truth masks, averaged over every pixel of every mask.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct MaskLoss {
    pub eps: f64,
}

impl Default for MaskLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for MaskLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("eps", &self.eps).optional()
    }
}

impl MaskLoss {
    /// Create a new mask loss with default configuration.
    pub fn new() -> Self {
        MaskLossConfig::new().init()
    }

    /// Mean binary cross entropy.
    ///
    /// # Shapes
    ///
    /// - predictions: `[K, H, W]`
    /// - targets: `[K, H, W]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 3>,
        targets: Tensor<B, 3>,
    ) -> Tensor<B, 1> {
        self.forward_no_reduction(predictions, targets).mean()
    }

    /// Per-pixel binary cross entropy.
    ///
    /// # Shapes
    ///
    /// - predictions: `[K, H, W]`
    /// - targets: `[K, H, W]`
    /// - output: `[K, H, W]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 3>,
        targets: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        self.assertions(&predictions, &targets);

        let p = predictions.clamp(self.eps, 1.0 - self.eps);
        let p_complement = p.clone().neg().add_scalar(1.0);
        let target_complement = targets.clone().neg().add_scalar(1.0);

        -(targets * p.log() + target_complement * p_complement.log())
    }

    fn assertions<B: Backend>(&self, predictions: &Tensor<B, 3>, targets: &Tensor<B, 3>) {
        let pred_dims = predictions.dims();
        let target_dims = targets.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of predictions ({pred_dims:?}) must match targets ({target_dims:?})"
        );
    }
}
