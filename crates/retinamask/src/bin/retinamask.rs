use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retinamask::{
    backend::{create_device, SelectedAutodiffBackend, NAME},
    run_bench, RunConfig,
};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "retinamask")]
#[command(about = "Multi-task detection loss for anchor-based detectors with a mask head")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend information
    Info,

    /// Write the default run configuration as JSON
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "retinamask.json")]
        output: PathBuf,
    },

    /// Run the loss forward and backward on a synthetic batch
    Bench {
        /// Run configuration file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the number of timed iterations
        #[arg(short, long)]
        iterations: Option<usize>,
    },
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter = EnvFilter::from_default_env();
    let filter = if env::var("RUST_LOG").is_err() {
        filter.add_directive(LevelFilter::INFO.into())
    } else {
        filter
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let device = create_device();
    info!(backend = NAME, "backend selected");

    match cli.command {
        Commands::Info => {
            println!("RetinaMask Information:");
            println!("  Backend: {NAME}");
            println!("  Device: {device:?}");
            Ok(())
        }

        Commands::InitConfig { output } => {
            RunConfig::new()
                .save(&output)
                .with_context(|| format!("failed to initialize '{}'", output.display()))?;
            info!(path = %output.display(), "default configuration written");
            Ok(())
        }

        Commands::Bench { config, iterations } => {
            let mut run_config = match config {
                Some(path) => RunConfig::load(&path)?,
                None => RunConfig::new(),
            };
            if let Some(iterations) = iterations {
                run_config.iterations = iterations;
            }
            info!(config = %run_config, "starting benchmark");

            let report = run_bench::<SelectedAutodiffBackend>(&run_config, &device)?;
            println!(
                "classification {:.6}  regression {:.6}  mask {:.6}  total {:.6}",
                report.classification, report.regression, report.mask, report.total
            );
            println!(
                "{} iterations, mean {:?}",
                report.iteration_times.len(),
                report.mean_iteration_time()
            );
            Ok(())
        }
    }
}
