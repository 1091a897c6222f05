//! burn-diffusion CLI
//!
//! Command-line front end for the sampling loop.
//!
//! Supports:
//! - Running a full generation with a synthetic predictor
//! - Printing a scheduler's timesteps and sigmas
//! - Printing the context windows planned for video latents

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use burn::prelude::*;
use burn_diffusion::backends::{default_device, DefaultBackend};
use burn_diffusion::schedulers::{AnyScheduler, Scheduler, SchedulerKind};
use burn_diffusion::{
    compute_tensor_std, context_windows, total_windows, ContextWindowConfig, DiffusionProgress, DiffusionSampler,
    DiffusionStrategy, ImageToLatent, PromptEmbeddings, TextToLatent, VideoToLatent,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

mod config;
mod synthetic;

use config::GenerationConfig;
use synthetic::SyntheticPredictor;

/// Sequence length and width of the stand-in prompt embeddings
const PROMPT_TOKENS: usize = 8;
const PROMPT_HIDDEN: usize = 16;

#[derive(Parser)]
#[command(name = "burn-diffusion")]
#[command(about = "Diffusion sampling in pure Rust")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full generation with a synthetic noise predictor
    Sample {
        /// JSON generation config (flags override its values)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scheduler algorithm (e.g. euler, ddim, kdpm2_ancestral, locomotion)
        #[arg(short, long)]
        scheduler: Option<SchedulerKind>,

        /// Number of inference steps
        #[arg(long)]
        steps: Option<usize>,

        /// Guidance scale
        #[arg(long)]
        guidance: Option<f32>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Latent frames (more than one runs context windows)
        #[arg(long)]
        frames: Option<usize>,

        /// Latent height
        #[arg(long)]
        height: Option<usize>,

        /// Latent width
        #[arg(long)]
        width: Option<usize>,

        /// Start from a constant latent with this value instead of pure noise
        #[arg(long)]
        init_value: Option<f32>,

        /// Denoising strength when starting from a latent
        #[arg(long)]
        strength: Option<f32>,

        /// Synthetic predictor output scale
        #[arg(long, default_value = "0.1")]
        predictor_scale: f32,

        /// Write the final latent as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a scheduler's timesteps and sigmas
    Timesteps {
        /// Scheduler algorithm
        #[arg(short, long, default_value = "euler")]
        scheduler: SchedulerKind,

        /// JSON generation config; its scheduler config is used
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of inference steps
        #[arg(long)]
        steps: Option<usize>,

        /// Use Karras sigmas
        #[arg(long)]
        karras: bool,
    },

    /// Print the context windows for a frame count
    Windows {
        /// Number of latent frames
        #[arg(short, long)]
        frames: usize,

        /// First outer step to show
        #[arg(long, default_value = "0")]
        step: usize,

        /// Number of outer steps to show
        #[arg(long, default_value = "1")]
        count: usize,

        /// Frames per window
        #[arg(long, default_value = "16")]
        context_size: usize,

        /// Largest dilation exponent
        #[arg(long, default_value = "3")]
        stride: usize,

        /// Frames shared by neighbouring windows
        #[arg(long, default_value = "4")]
        overlap: usize,

        /// Let the last windows wrap around
        #[arg(long)]
        closed_loop: bool,
    },
}

#[derive(Serialize)]
struct LatentDump {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn run_generation<const D: usize, S>(
    config: &GenerationConfig,
    strategy: S,
    predictor_scale: f32,
    output: Option<&PathBuf>,
) -> Result<()>
where
    S: DiffusionStrategy<DefaultBackend, D>,
{
    let device = default_device();
    let options = config.sampler_options();
    let mut sampler = DiffusionSampler::<DefaultBackend, D, S>::new(
        config.scheduler,
        config.scheduler_config.clone(),
        strategy,
        options,
        &device,
    )
    .context("Failed to set up sampler")?;

    let prompt = PromptEmbeddings::new(
        Tensor::ones([1, PROMPT_TOKENS, PROMPT_HIDDEN], &device),
        Tensor::zeros([1, PROMPT_TOKENS, PROMPT_HIDDEN], &device),
    );
    let mut predictor = SyntheticPredictor::new(predictor_scale);

    let pb = progress_bar()?;
    let mut report = |p: DiffusionProgress| {
        pb.set_length(p.total_steps as u64);
        pb.set_position(p.step as u64);
        pb.set_message(format!("{:.1} ms/window", p.elapsed_ms));
    };

    let start = Instant::now();
    let latents = sampler
        .generate(&mut predictor, &prompt, &mut report)
        .context("Generation failed")?;
    pb.finish_with_message("done");

    let shape = latents.dims().to_vec();
    let std = compute_tensor_std(&latents)?;
    let data = latents
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("Failed to read latents: {err:?}"))?;
    let mean = data.iter().sum::<f32>() / data.len().max(1) as f32;

    println!();
    println!("Result:");
    println!("  Shape:  {:?}", shape);
    println!("  Mean:   {:.5}", mean);
    println!("  Std:    {:.5}", std);
    println!("  Passes: {}", predictor.calls());
    println!("  Time:   {:.2?}", start.elapsed());

    if let Some(path) = output {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), &LatentDump { shape, data })
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Saved:  {}", path.display());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_sample(
    config_path: Option<PathBuf>,
    scheduler: Option<SchedulerKind>,
    steps: Option<usize>,
    guidance: Option<f32>,
    seed: Option<u64>,
    frames: Option<usize>,
    height: Option<usize>,
    width: Option<usize>,
    init_value: Option<f32>,
    strength: Option<f32>,
    predictor_scale: f32,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => GenerationConfig::from_file(path)?,
        None => GenerationConfig::default(),
    };

    if let Some(kind) = scheduler {
        config.scheduler = kind;
    }
    if let Some(steps) = steps {
        config.scheduler_config.inference_steps = steps;
    }
    if let Some(guidance) = guidance {
        config.scheduler_config.guidance_scale = guidance;
        if let Some(sampler) = config.sampler.as_mut() {
            sampler.guidance_scale = guidance;
        }
    }
    if let Some(seed) = seed {
        config.scheduler_config.seed = seed;
    }
    if let Some(frames) = frames {
        config.latent.frames = frames;
    }
    if let Some(height) = height {
        config.latent.height = height;
    }
    if let Some(width) = width {
        config.latent.width = width;
    }
    if let Some(strength) = strength {
        config.scheduler_config.strength = strength;
    }
    if init_value.is_some() {
        config.init_value = init_value;
    }

    let options = config.sampler_options();
    println!("burn-diffusion: Diffusion sampling in pure Rust\n");
    println!("Configuration:");
    println!("  Scheduler: {}", config.scheduler);
    println!("  Steps:     {}", config.scheduler_config.inference_steps);
    println!("  Guidance:  {}", options.guidance_scale);
    println!("  Seed:      {}", config.scheduler_config.seed);
    if config.latent.is_video() {
        println!("  Latent:    {:?}", config.latent.video());
        println!(
            "  Context:   {} frames, stride {}, overlap {}{}",
            options.context.context_size,
            options.context.stride,
            options.context.overlap,
            if options.context.closed_loop { ", closed loop" } else { "" }
        );
    } else {
        println!("  Latent:    {:?}", config.latent.image());
    }
    if let Some(value) = config.init_value {
        println!("  Init:      {} (strength {:.2})", value, config.scheduler_config.strength);
    }
    println!();

    tracing::debug!(?config, "Resolved generation config");

    let device = default_device();
    let output = output.as_ref();
    match (config.latent.is_video(), config.init_value) {
        (true, Some(value)) => {
            let encoded = Tensor::<DefaultBackend, 5>::full(config.latent.video(), value, &device);
            let strategy = ImageToLatent::new(encoded, config.scheduler_config.strength);
            run_generation(&config, strategy, predictor_scale, output)
        }
        (true, None) => {
            let [b, c, f, h, w] = config.latent.video();
            let strategy = VideoToLatent::new(b, c, f, h, w);
            run_generation(&config, strategy, predictor_scale, output)
        }
        (false, Some(value)) => {
            let encoded = Tensor::<DefaultBackend, 4>::full(config.latent.image(), value, &device);
            let strategy = ImageToLatent::new(encoded, config.scheduler_config.strength);
            run_generation(&config, strategy, predictor_scale, output)
        }
        (false, None) => {
            let strategy = TextToLatent::new(config.latent.image());
            run_generation(&config, strategy, predictor_scale, output)
        }
    }
}

fn run_timesteps(
    scheduler: SchedulerKind,
    config_path: Option<PathBuf>,
    steps: Option<usize>,
    karras: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => GenerationConfig::from_file(path)?.scheduler_config,
        None => Default::default(),
    };
    if let Some(steps) = steps {
        config.inference_steps = steps;
    }
    config.use_karras_sigmas |= karras;

    let scheduler = AnyScheduler::<DefaultBackend, 4>::new(scheduler, config).context("Invalid scheduler config")?;
    let timesteps = Scheduler::<DefaultBackend, 4>::timesteps(&scheduler);

    println!("Scheduler:        {}", Scheduler::<DefaultBackend, 4>::kind(&scheduler));
    println!("Order:            {}", Scheduler::<DefaultBackend, 4>::order(&scheduler));
    println!("Init noise sigma: {}", Scheduler::<DefaultBackend, 4>::init_noise_sigma(&scheduler));
    println!("Timesteps ({}):", timesteps.len());
    println!("  {:?}", timesteps);
    if let Some(sigmas) = scheduler.sigmas() {
        println!("Sigmas ({}):", sigmas.len());
        let formatted: Vec<String> = sigmas.iter().map(|s| format!("{s:.4}")).collect();
        println!("  [{}]", formatted.join(", "));
    }
    Ok(())
}

fn run_windows(frames: usize, step: usize, count: usize, context: ContextWindowConfig) -> Result<()> {
    if let Some(problem) = context.check() {
        anyhow::bail!("Invalid context window config: {problem}");
    }

    let mut shown = 0;
    for step in step..step + count {
        let windows = context_windows(step, frames, &context);
        println!("Step {} ({} windows):", step, windows.len());
        shown += windows.len();
        for window in windows {
            println!("  {:?}", window);
        }
    }
    println!("Shown: {} windows", shown);
    println!(
        "Total for {} steps from step 0: {} windows",
        step + count,
        total_windows(step + count, frames, &context)
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sample {
            config,
            scheduler,
            steps,
            guidance,
            seed,
            frames,
            height,
            width,
            init_value,
            strength,
            predictor_scale,
            output,
        } => run_sample(
            config,
            scheduler,
            steps,
            guidance,
            seed,
            frames,
            height,
            width,
            init_value,
            strength,
            predictor_scale,
            output,
        ),

        Commands::Timesteps {
            scheduler,
            config,
            steps,
            karras,
        } => run_timesteps(scheduler, config, steps, karras),

        Commands::Windows {
            frames,
            step,
            count,
            context_size,
            stride,
            overlap,
            closed_loop,
        } => run_windows(
            frames,
            step,
            count,
            ContextWindowConfig {
                context_size,
                stride,
                overlap,
                closed_loop,
            },
        ),
    }
}
