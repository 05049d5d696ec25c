mod sampling;

use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use sd_bench_common::{FileLoader, ModelSource, NiceProgressBar, TokenSource};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use super::{CompileMode, DiffusionGenerationParams, ImageBatch, LoadParams, Loader, ModelPipeline};
use crate::{
    util::{select_device, Precision, TryIntoDType},
    RunConfiguration,
};

const VAE_SCALE: f64 = 0.18215;
const UNCOND_PROMPT: &str = "";

#[derive(Clone, Debug, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SdVersion {
    #[value(name = "v1-5")]
    V1_5,
    #[value(name = "v2-1")]
    V2_1,
}

impl SdVersion {
    fn repo(&self) -> &'static str {
        match self {
            Self::V1_5 => "stable-diffusion-v1-5/stable-diffusion-v1-5",
            Self::V2_1 => "stabilityai/stable-diffusion-2-1",
        }
    }

    /// Both versions share the CLIP BPE vocabulary, v2-1 only pads differently.
    fn tokenizer_repo(&self) -> &'static str {
        match self {
            Self::V1_5 | Self::V2_1 => "openai/clip-vit-base-patch32",
        }
    }

    fn config(&self, width: usize, height: usize) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, Some(height), Some(width)),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, Some(height), Some(width)),
        }
    }
}

/// Path of a component's weights inside a diffusers-layout repository, preferring the
/// `.fp16` variant for half precision when the repository has one.
fn weight_file(component: &str, stem: &str, precision: Precision, files: &[String]) -> String {
    let full = format!("{component}/{stem}.safetensors");
    if precision == Precision::Half {
        let half = format!("{component}/{stem}.fp16.safetensors");
        if files.contains(&half) {
            return half;
        }
    }
    full
}

/// Loads Stable Diffusion weights from the Hugging Face Hub.
#[derive(Debug, Clone)]
pub struct StableDiffusionLoader {
    version: SdVersion,
    cpu: bool,
    token: TokenSource,
    revision: Option<String>,
}

impl StableDiffusionLoader {
    pub fn from_config(cfg: &RunConfiguration) -> Self {
        Self {
            version: cfg.sd_version,
            cpu: cfg.cpu,
            token: cfg.token.clone(),
            revision: cfg.revision.clone(),
        }
    }

    fn use_flash_attn(compile_mode: CompileMode) -> bool {
        match compile_mode {
            CompileMode::Eager => false,
            CompileMode::Accelerated if cfg!(feature = "flash-attn") => true,
            CompileMode::Accelerated => {
                warn!("accelerated execution needs the `flash-attn` feature, running eagerly.");
                false
            }
        }
    }
}

impl Loader for StableDiffusionLoader {
    type Pipeline = StableDiffusionPipeline;

    fn name(&self) -> &'static str {
        "stable-diffusion"
    }

    fn load(&self, params: &LoadParams) -> anyhow::Result<StableDiffusionPipeline> {
        let source = ModelSource::from_model_id(self.version.repo())
            .with_revision(self.revision.clone());
        if !params.silent {
            info!("loading from source: {source}.");
        }

        let device = select_device(self.cpu)?;
        let dtype = params.precision.try_into_dtype(&device, params.silent)?;
        let sd_config = self.version.config(params.width, params.height);
        let use_flash_attn = Self::use_flash_attn(params.compile_mode);

        let loader = FileLoader::from_model_source(&source, params.silent, &self.token)?;
        let files = loader.list_files()?;
        let fetch = |component: &str, stem: &str| -> anyhow::Result<PathBuf> {
            loader.read_file(&weight_file(component, stem, params.precision, &files))
        };
        let clip_weights = fetch("text_encoder", "model")?;
        let vae_weights = fetch("vae", "diffusion_pytorch_model")?;
        let unet_weights = fetch("unet", "diffusion_pytorch_model")?;

        let tokenizer_file = FileLoader::from_model_source(
            &ModelSource::from_model_id(self.version.tokenizer_repo()),
            params.silent,
            &self.token,
        )?
        .read_file("tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(tokenizer_file).map_err(anyhow::Error::msg)?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no `{pad_token}` token"))?;

        if !params.silent {
            info!("building the CLIP text encoder.");
        }
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            clip_weights,
            &device,
            dtype,
        )?;
        if !params.silent {
            info!("building the autoencoder.");
        }
        let vae = sd_config.build_vae(vae_weights, &device, dtype)?;
        if !params.silent {
            info!("building the UNet, flash attention: {use_flash_attn}.");
        }
        let unet = sd_config.build_unet(
            unet_weights,
            &device,
            sampling::LATENT_CHANNELS,
            use_flash_attn,
            dtype,
        )?;

        Ok(StableDiffusionPipeline {
            sd_config,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
            device,
            dtype,
            silent: params.silent,
        })
    }
}

pub struct StableDiffusionPipeline {
    sd_config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    device: Device,
    dtype: DType,
    silent: bool,
}

impl StableDiffusionPipeline {
    /// CLIP embedding of one prompt, shape `(1, seq_len, hidden)`.
    fn embed(&self, prompt: &str) -> anyhow::Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        let tokens = sampling::pad_tokens(
            tokens,
            self.sd_config.clip.max_position_embeddings,
            self.pad_id,
        );
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    /// Text conditioning for a batch; with guidance the unconditional half comes first.
    fn text_embeddings(
        &self,
        prompt: &str,
        batch_size: usize,
        use_guidance: bool,
    ) -> anyhow::Result<Tensor> {
        let cond = self.embed(prompt)?.repeat((batch_size, 1, 1))?;
        if !use_guidance {
            return Ok(cond);
        }
        let uncond = self.embed(UNCOND_PROMPT)?.repeat((batch_size, 1, 1))?;
        Ok(Tensor::cat(&[uncond, cond], 0)?)
    }
}

impl ModelPipeline for StableDiffusionPipeline {
    fn forward(
        &mut self,
        prompt: &str,
        params: &DiffusionGenerationParams,
    ) -> anyhow::Result<ImageBatch> {
        let use_guidance = params.guidance_scale > 1.0;
        let bs = params.batch_size;
        let text_embeddings = self.text_embeddings(prompt, bs, use_guidance)?;

        let mut scheduler = self.sd_config.build_scheduler(params.num_steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let latents = sampling::initial_latents(
            bs,
            self.sd_config.height,
            self.sd_config.width,
            params.seed,
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        for &timestep in NiceProgressBar::<_, 'g'>(timesteps.iter(), "Denoise loop", self.silent) {
            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                sampling::apply_guidance(&noise_pred, params.guidance_scale)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        let img = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        super::images_from_tensor(&sampling::to_pixels(&img)?)
    }
}
