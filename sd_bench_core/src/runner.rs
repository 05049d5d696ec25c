use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
    pipelines::{DiffusionGenerationParams, ImageBatch, ModelPipeline},
    Error, Result, RunConfiguration,
};

/// Prompt of the discarded warm-up call.
pub const WARMUP_PROMPT: &str = "warming up the model";

/// Output of a benchmark run: the final batch and how long each call took.
#[derive(Debug, Clone)]
pub struct InferenceReport {
    images: ImageBatch,
    warmup: Duration,
    timings: Vec<Duration>,
    batch_size: usize,
}

impl InferenceReport {
    pub fn images(&self) -> &ImageBatch {
        &self.images
    }

    pub fn warmup(&self) -> Duration {
        self.warmup
    }

    /// Duration of each timed iteration, in order.
    pub fn timings(&self) -> &[Duration] {
        &self.timings
    }

    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.timings.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.timings.iter().sum::<Duration>() / n,
        }
    }

    /// Images generated per second over the timed iterations.
    pub fn throughput(&self) -> f64 {
        let total = self.timings.iter().sum::<Duration>().as_secs_f64();
        if total == 0.0 {
            return 0.0;
        }
        (self.batch_size * self.timings.len()) as f64 / total
    }
}

/// Owns the model for the whole run and drives warm-up plus the timed iterations.
pub struct InferenceRunner<P: ModelPipeline> {
    pipeline: P,
    silent: bool,
}

impl<P: ModelPipeline> InferenceRunner<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            silent: false,
        }
    }

    /// Suppress per-iteration logging.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// One warm-up call, then `cfg.iterations` timed calls.
    ///
    /// Only the batch of the last iteration is returned, every earlier batch (warm-up included) is dropped.
    /// Every call uses the configured step count. An out of range configuration is rejected
    /// before the model is touched.
    pub fn run(&mut self, cfg: &RunConfiguration) -> Result<InferenceReport> {
        cfg.validate()?;
        if cfg.accuracy {
            warn!("accuracy comparison is not implemented, ignoring `--accuracy`.");
        }
        let params = cfg.generation_params();

        if !self.silent {
            info!("starting warm-up.");
        }
        let start = Instant::now();
        self.generate(WARMUP_PROMPT, &params)?;
        let warmup = start.elapsed();
        if !self.silent {
            info!("warm-up took {:.2}s.", warmup.as_secs_f32());
            info!(
                "running {} iteration(s) of {} image(s), {} steps.",
                cfg.iterations, params.batch_size, params.num_steps
            );
        }

        let mut timings = Vec::with_capacity(cfg.iterations);
        let mut last = ImageBatch::default();
        for i in 0..cfg.iterations {
            let start = Instant::now();
            let images = self.generate(&cfg.prompt, &params)?;
            let elapsed = start.elapsed();
            if !self.silent {
                info!(
                    "iteration {}/{} took {:.2}s.",
                    i + 1,
                    cfg.iterations,
                    elapsed.as_secs_f32()
                );
            }
            timings.push(elapsed);
            last = images;
        }

        Ok(InferenceReport {
            images: last,
            warmup,
            timings,
            batch_size: params.batch_size,
        })
    }

    fn generate(&mut self, prompt: &str, params: &DiffusionGenerationParams) -> Result<ImageBatch> {
        let images = self
            .pipeline
            .forward(prompt, params)
            .map_err(Error::Generation)?;
        if images.len() != params.batch_size {
            return Err(Error::Generation(anyhow::anyhow!(
                "expected {} image(s), the model returned {}",
                params.batch_size,
                images.len()
            )));
        }
        Ok(images)
    }
}
