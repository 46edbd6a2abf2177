use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use soft_dice::{
    backend::{create_device, InnerBackend, NAME},
    check::{run_gradient_check, GradientCheckConfig},
    eval::run_evaluation,
    loss::{DiceReduction, SoftDiceLossConfig},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "soft-dice")]
#[command(about = "Soft Dice loss with an analytic backward pass: gradient checks and evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the analytic gradient against autodiff on random batches
    Compare {
        #[command(flatten)]
        loss: LossArgs,

        /// Number of random batches
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,

        /// Batch size
        #[arg(short, long, default_value_t = 2)]
        batch_size: usize,

        /// Height of the logits map
        #[arg(long, default_value_t = 64)]
        height: usize,

        /// Width of the logits map
        #[arg(long, default_value_t = 64)]
        width: usize,

        /// Seed of the random batch generator
        #[arg(long, default_value_t = 15)]
        seed: u64,

        /// Maximum accepted relative gradient difference. Elements below
        /// --relative-floor times the largest gradient are measured against that floor
        #[arg(long, default_value_t = 1e-4)]
        tolerance: f64,

        /// Fraction of the largest gradient used as the relative comparison floor
        /// (0 compares every element against its own magnitude)
        #[arg(long, default_value_t = 1e-2)]
        relative_floor: f64,
    },

    /// Evaluate the analytic loss once from a JSON configuration
    Eval {
        /// Loss configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Batch size
        #[arg(short, long, default_value_t = 2)]
        batch_size: usize,

        /// Height and width of the logits map
        #[arg(long, default_value_t = 64)]
        size: usize,

        /// Seed of the random batch generator
        #[arg(long, default_value_t = 15)]
        seed: u64,
    },

    /// Show backend information
    Info,
}

#[derive(Args)]
struct LossArgs {
    /// Exponent applied to the probabilities in the denominator
    #[arg(short, long, default_value_t = 1.0)]
    p: f64,

    /// Smoothing constant
    #[arg(short, long, default_value_t = 1.0)]
    smooth: f64,

    /// Reduction policy: mean, sum or none (unknown values mean none)
    #[arg(short, long, default_value = "mean")]
    reduction: String,
}

impl LossArgs {
    fn config(&self) -> SoftDiceLossConfig {
        SoftDiceLossConfig::new()
            .with_p(self.p)
            .with_smooth(self.smooth)
            .with_reduction(DiceReduction::from(self.reduction.as_str()))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let device = create_device();

    match cli.command {
        Commands::Compare {
            loss,
            iterations,
            batch_size,
            height,
            width,
            seed,
            tolerance,
            relative_floor,
        } => {
            let config = GradientCheckConfig::new(loss.config())
                .with_iterations(iterations)
                .with_batch_size(batch_size)
                .with_height(height)
                .with_width(width)
                .with_seed(seed)
                .with_tolerance(tolerance)
                .with_relative_floor(relative_floor);

            tracing::info!(backend = NAME, "running gradient check");
            let report = run_gradient_check::<InnerBackend>(&config, &device)?;
            println!(
                "{} iterations: max loss diff {:e}, max grad diff {:e} (abs) / {:e} (rel)",
                report.iterations,
                report.max_loss_diff,
                report.max_abs_grad_diff,
                report.max_rel_grad_diff
            );
        }
        Commands::Eval {
            config,
            batch_size,
            size,
            seed,
        } => {
            if !config.exists() {
                anyhow::bail!("Configuration file not found: {}", config.display());
            }
            tracing::info!(config = %config.display(), "loading loss configuration");
            let loss_config = SoftDiceLossConfig::load(&config)
                .with_context(|| format!("failed to parse {}", config.display()))?;

            let shape = [batch_size, size, size];
            let evaluation = run_evaluation::<InnerBackend>(&loss_config, shape, seed, &device)?;
            println!(
                "loss: {:.6}, gradient norm: {:.6e}",
                evaluation.loss, evaluation.grad_norm
            );
        }
        Commands::Info => {
            println!("Using backend: {NAME}");
        }
    }

    Ok(())
}
