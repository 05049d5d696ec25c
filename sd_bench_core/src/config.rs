use std::{ffi::OsString, path::PathBuf};

use clap::Parser;
use sd_bench_common::TokenSource;

use crate::{
    pipelines::{CompileMode, DiffusionGenerationParams, SdVersion},
    Error, Result,
};

pub const DEFAULT_PROMPT: &str = "a photo of an astronaut riding a horse on mars";

/// Stable Diffusion inference benchmark.
#[derive(Parser, Debug, Clone)]
#[command(name = "sd_bench", version)]
pub struct Args {
    /// Number of images generated at one time.
    #[arg(long = "batch_size", default_value_t = 1)]
    pub batch_size: usize,

    /// Whether to enable graph acceleration in the model backend.
    #[arg(long = "use_xla")]
    pub use_xla: bool,

    /// Number of diffusion steps.
    #[arg(long = "num_steps", default_value_t = 50)]
    pub num_steps: usize,

    /// The text prompt to put into the text encoder.
    #[arg(long, default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Precision, only fp32 and fp16 are supported.
    #[arg(long, default_value = "fp32")]
    pub precision: String,

    /// Number of timed iterations.
    #[arg(long, default_value_t = 2)]
    pub iterations: usize,

    /// Whether to compare accuracy with CPU. Not implemented, accepted for compatibility.
    #[arg(long)]
    pub accuracy: bool,

    /// Classifier-free guidance scale. Values <= 1.0 disable the unconditional pass.
    #[arg(long = "guidance_scale", default_value_t = 7.5)]
    pub guidance_scale: f64,

    /// Seed for the initial latent noise.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Which Stable Diffusion weights to use.
    #[arg(long = "sd_version", value_enum, default_value = "v1-5")]
    pub sd_version: SdVersion,

    /// Run on CPU rather than on GPU.
    #[arg(long)]
    pub cpu: bool,

    /// Hugging Face token source: `literal:<token>`, `env[:<VAR>]`, `path:<file>`, `cache` or `none`.
    #[arg(long, default_value = "cache")]
    pub token: TokenSource,

    /// Hugging Face revision of the model weights. Defaults to `main`.
    #[arg(long)]
    pub revision: Option<String>,

    /// Directory the output image is written to.
    #[arg(long = "output_dir", default_value = ".")]
    pub output_dir: PathBuf,
}

/// Settings of a single benchmark run. Built once, then only read.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub batch_size: usize,
    pub use_xla: bool,
    pub num_steps: usize,
    pub prompt: String,
    /// Raw precision string. Validated when the model is loaded.
    pub precision: String,
    pub iterations: usize,
    pub accuracy: bool,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
    pub sd_version: SdVersion,
    pub cpu: bool,
    pub token: TokenSource,
    pub revision: Option<String>,
    pub output_dir: PathBuf,
}

fn require_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidArgument(format!(
            "`--{name}` must be a positive integer"
        )));
    }
    Ok(())
}

impl TryFrom<Args> for RunConfiguration {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self> {
        let cfg = Self {
            batch_size: args.batch_size,
            use_xla: args.use_xla,
            num_steps: args.num_steps,
            prompt: args.prompt,
            precision: args.precision,
            iterations: args.iterations,
            accuracy: args.accuracy,
            guidance_scale: args.guidance_scale,
            seed: args.seed,
            sd_version: args.sd_version,
            cpu: args.cpu,
            token: args.token,
            revision: args.revision,
            output_dir: args.output_dir,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl RunConfiguration {
    /// Parse a full command line, program name first.
    pub fn try_from_iter<I, T>(itr: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(itr).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Self::try_from(args)
    }

    /// Range checks on the numeric settings. The fields are public, so the runner checks again.
    pub(crate) fn validate(&self) -> Result<()> {
        require_positive("batch_size", self.batch_size)?;
        require_positive("num_steps", self.num_steps)?;
        require_positive("iterations", self.iterations)?;
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "`--guidance_scale` must be a non-negative number, got {}",
                self.guidance_scale
            )));
        }
        Ok(())
    }

    pub fn compile_mode(&self) -> CompileMode {
        if self.use_xla {
            CompileMode::Accelerated
        } else {
            CompileMode::Eager
        }
    }

    /// Parameters for every generation call of this run.
    pub fn generation_params(&self) -> DiffusionGenerationParams {
        DiffusionGenerationParams {
            batch_size: self.batch_size,
            num_steps: self.num_steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
        }
    }
}
