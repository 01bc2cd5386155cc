//! `RetinaMask`: process-level shell around the detection loss.
//!
//! This crate selects the numeric backend from Cargo features, loads run
//! configurations from JSON, and drives [`retinamask_loss::DetectionLoss`] on
//! synthetic batches for smoke testing and timing.

pub mod backend;
pub mod bench;
pub mod config;
pub mod synthetic;

#[doc(inline)]
pub use retinamask_loss as loss;
#[doc(inline)]
pub use retinamask_ops as ops;

pub use bench::{run_bench, BenchReport};
pub use config::{RunConfig, SyntheticBatchConfig};
pub use synthetic::{anchor_grid, SyntheticBatch};
