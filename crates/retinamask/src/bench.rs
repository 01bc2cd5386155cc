use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    tensor::{backend::AutodiffBackend, cast::ToElement},
};
use tracing::info;

use crate::{config::RunConfig, synthetic::SyntheticBatch};

/// Timings and final loss values of a benchmark run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Wall time of every forward and backward pass, in order.
    pub iteration_times: Vec<Duration>,
    pub classification: f64,
    pub regression: f64,
    pub mask: f64,
    /// Weighted total of the last iteration.
    pub total: f64,
}

impl BenchReport {
    pub fn mean_iteration_time(&self) -> Duration {
        if self.iteration_times.is_empty() {
            return Duration::ZERO;
        }
        self.iteration_times.iter().sum::<Duration>() / self.iteration_times.len() as u32
    }
}

/// Runs the detection loss forward and backward on a synthetic batch.
///
/// # Errors
///
/// Returns an error if the synthetic batch is rejected by the loss, or if a
/// loss value or gradient is not finite.
pub fn run_bench<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<BenchReport> {
    info!(?device, iterations = config.iterations, "initializing detection loss benchmark");

    B::seed(config.seed);

    let loss = config.loss.init();
    let batch = SyntheticBatch::<B>::generate(&config.synthetic, device);
    info!(
        batch_size = config.synthetic.batch_size,
        anchors = config.synthetic.num_anchors(),
        classes = config.synthetic.num_classes,
        annotations = batch.num_annotations(),
        "synthetic batch generated"
    );

    let mut iteration_times = Vec::with_capacity(config.iterations);
    let mut last = None;
    for iteration in 0..config.iterations {
        let start = Instant::now();

        let classifications = batch.classifications.clone().require_grad();
        let output = loss
            .forward(
                classifications.clone(),
                batch.regressions.clone().require_grad(),
                batch.masks.clone().require_grad(),
                batch.anchors.clone(),
                &batch.bbox_annotations,
                &batch.mask_annotations,
            )
            .with_context(|| format!("loss rejected synthetic batch at iteration {iteration}"))?;

        let total = output.weighted_total(&config.loss.weights);
        let grads = total.clone().backward();
        let grad_sum = classifications
            .grad(&grads)
            .map_or(0.0, |grad| grad.abs().sum().into_scalar().to_f64());

        let elapsed = start.elapsed();
        iteration_times.push(elapsed);

        let scalars = output.scalars();
        let total = total.into_scalar().to_f64();
        anyhow::ensure!(
            total.is_finite() && grad_sum.is_finite(),
            "non-finite loss at iteration {iteration}: total {total}, gradient mass {grad_sum}"
        );

        info!(
            iteration,
            classification = scalars["classification"],
            regression = scalars["regression"],
            mask = scalars["mask"],
            total,
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            "loss step"
        );
        last = Some((scalars, total));
    }

    let (scalars, total) = last.context("benchmark needs at least one iteration")?;
    let report = BenchReport {
        iteration_times,
        classification: scalars["classification"],
        regression: scalars["regression"],
        mask: scalars["mask"],
        total,
    };

    info!(
        mean_ms = report.mean_iteration_time().as_secs_f64() * 1e3,
        "benchmark completed"
    );
    Ok(report)
}
