use std::{fs, path::Path};

use anyhow::{Context, Result};
use burn::config::Config;
use retinamask_loss::DetectionLossConfig;

/// Geometry of the synthetic batch driven through the loss by `retinamask bench`.
#[derive(Config, Debug)]
pub struct SyntheticBatchConfig {
    #[config(default = 4)]
    pub batch_size: usize,

    /// Anchor centers form a `grid_size x grid_size` lattice.
    #[config(default = 8)]
    pub grid_size: usize,

    /// Distance between neighbouring anchor centers, in pixels.
    #[config(default = 32.0)]
    pub stride: f64,

    /// Anchor side lengths as multiples of `stride`, one anchor per scale per cell.
    #[config(default = "vec![1.0, 2.0]")]
    pub anchor_scales: Vec<f64>,

    #[config(default = 4)]
    pub num_classes: usize,

    /// Side length of the square predicted and annotated masks.
    #[config(default = 28)]
    pub mask_size: usize,

    /// Annotations placed on each non-empty image.
    #[config(default = 3)]
    pub annotations_per_image: usize,

    /// Every `n`-th image carries no annotations. `0` disables empty images.
    #[config(default = 2)]
    pub empty_image_interval: usize,
}

impl SyntheticBatchConfig {
    /// Number of anchors the grid produces.
    pub fn num_anchors(&self) -> usize {
        self.grid_size * self.grid_size * self.anchor_scales.len()
    }
}

/// Configuration of a `retinamask bench` run.
#[derive(Config, Debug)]
pub struct RunConfig {
    /// Loss under test.
    #[config(default = "DetectionLossConfig::new()")]
    pub loss: DetectionLossConfig,

    #[config(default = "SyntheticBatchConfig::new()")]
    pub synthetic: SyntheticBatchConfig,

    /// Timed forward and backward passes.
    #[config(default = 10)]
    pub iterations: usize,

    /// Random seed for reproducibility.
    #[config(default = 42)]
    pub seed: u64,
}

impl RunConfig {
    /// Loads a run configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&config_str)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str)
            .with_context(|| format!("failed to write config file '{}'", path.display()))?;
        Ok(())
    }
}
