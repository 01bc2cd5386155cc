//! Smooth L1 (Huber) loss for box regression.
//!
//! With `d = |target - prediction|`:
//! ```text
//! loss = 0.5 * d^2 / beta   if d <= beta
//!        d - 0.5 * beta     otherwise
//! ```
//! Both branches agree at `d == beta`.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{backend::Backend, Tensor},
};

/// Configuration for creating a [Smooth L1 loss](SmoothL1Loss).
#[derive(Config, Debug)]
pub struct SmoothL1LossConfig {
    /// Transition point between the quadratic and linear regimes. Default: 1/9
    #[config(default = "1.0 / 9.0")]
    pub beta: f64,
}

impl SmoothL1LossConfig {
    /// Initialize [Smooth L1 loss](SmoothL1Loss).
    pub fn init(&self) -> SmoothL1Loss {
        self.assertions();
        SmoothL1Loss { beta: self.beta }
    }

    fn assertions(&self) {
        assert!(
            self.beta > 0.0,
            "Beta for SmoothL1Loss must be positive, got {}",
            self.beta
        );
    }
}

/// Smooth L1 loss.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct SmoothL1Loss {
    /// Transition point between the quadratic and linear regimes.
    pub beta: f64,
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for SmoothL1Loss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("beta", &self.beta).optional()
    }
}

impl SmoothL1Loss {
    /// Create a new Smooth L1 loss with default configuration.
    pub fn new() -> Self {
        SmoothL1LossConfig::new().init()
    }

    /// Compute the criterion on the input tensor with reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[...dims]`
    /// - targets: `[...dims]`
    /// - output: `[1]`
    pub fn forward<const D: usize, B: Backend>(
        &self,
        predictions: Tensor<B, D>,
        targets: Tensor<B, D>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(predictions, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the criterion on the input tensor without reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[...dims]`
    /// - targets: `[...dims]`
    /// - output: `[...dims]`
    pub fn forward_no_reduction<const D: usize, B: Backend>(
        &self,
        predictions: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.assertions(&predictions, &targets);

        let diff = (targets - predictions).abs();
        let linear_region = diff.clone().greater_elem(self.beta);

        let quadratic = (diff.clone() * diff.clone()).mul_scalar(0.5 / self.beta);
        let linear = diff.sub_scalar(0.5 * self.beta);

        quadratic.mask_where(linear_region, linear)
    }

    fn assertions<const D: usize, B: Backend>(
        &self,
        predictions: &Tensor<B, D>,
        targets: &Tensor<B, D>,
    ) {
        let pred_dims = predictions.dims();
        let target_dims = targets.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of predictions ({pred_dims:?}) must match targets ({target_dims:?})"
        );
    }
}
