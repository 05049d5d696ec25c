use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub(super) const LATENT_CHANNELS: usize = 4;

/// Pad `tokens` with `pad_id` up to `max_len`, truncating longer sequences.
pub(super) fn pad_tokens(mut tokens: Vec<u32>, max_len: usize, pad_id: u32) -> Vec<u32> {
    tokens.truncate(max_len);
    tokens.resize(max_len, pad_id);
    tokens
}

/// Standard normal latents of shape `(batch, 4, height / 8, width / 8)`.
///
/// With a seed the noise is drawn on the host so that it is identical across devices.
pub(super) fn initial_latents(
    batch_size: usize,
    height: usize,
    width: usize,
    seed: Option<u64>,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let shape = (batch_size, LATENT_CHANNELS, height / 8, width / 8);
    let Some(seed) = seed else {
        return Ok(Tensor::randn(0f32, 1f32, shape, device)?);
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0f32, 1f32)?;
    let numel = batch_size * LATENT_CHANNELS * (height / 8) * (width / 8);
    let data: Vec<f32> = (0..numel).map(|_| normal.sample(&mut rng)).collect();
    Ok(Tensor::from_vec(data, shape, &Device::Cpu)?.to_device(device)?)
}

/// Combine the unconditional and text-conditioned halves of a noise prediction.
pub(super) fn apply_guidance(noise_pred: &Tensor, guidance_scale: f64) -> candle_core::Result<Tensor> {
    let noise_pred = noise_pred.chunk(2, 0)?;
    let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
    noise_pred_uncond + ((noise_pred_text - noise_pred_uncond)? * guidance_scale)?
}

/// Map decoded VAE output from `[-1, 1]` to u8 pixels on the CPU.
pub(super) fn to_pixels(img: &Tensor) -> candle_core::Result<Tensor> {
    let img = ((img.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
    (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)
}
