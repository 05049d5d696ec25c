//! Core crate of sd_bench: load a text-to-image model, warm it up, time a number of generation rounds and
//! save the final round's images side by side.
//!
//! ```rust,no_run
//! use sd_bench_core::{
//!     initialize, render, InferenceRunner, RunConfiguration, StableDiffusionLoader,
//! };
//!
//! let cfg = RunConfiguration::try_from_iter(["sd_bench", "--precision", "fp16", "--num_steps", "30"])?;
//!
//! let pipeline = initialize(&StableDiffusionLoader::from_config(&cfg), &cfg, false)?;
//! let report = InferenceRunner::new(pipeline).run(&cfg)?;
//! println!("Mean latency: {:.2}s", report.mean_latency().as_secs_f32());
//!
//! let path = render(report.images(), &cfg)?;
//! println!("Saved to {}", path.display());
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod config;
mod error;
mod pipelines;
mod render;
mod runner;
mod util;

pub use config::{Args, RunConfiguration, DEFAULT_PROMPT};
pub use error::{Error, Result};
pub use pipelines::{
    initialize, CompileMode, DiffusionGenerationParams, ImageBatch, LoadParams, Loader,
    ModelPipeline, SdVersion, StableDiffusionLoader, StableDiffusionPipeline, IMAGE_HEIGHT,
    IMAGE_WIDTH,
};
pub use render::{compose_row, output_filename, render};
pub use runner::{InferenceReport, InferenceRunner, WARMUP_PROMPT};
pub use sd_bench_common::TokenSource;
pub use util::{Precision, TryIntoDType};
