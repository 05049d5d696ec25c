mod stable_diffusion;

use candle_core::Tensor;
use image::{DynamicImage, RgbImage};
use tracing::info;

use crate::{util::Precision, Error, Result, RunConfiguration};

pub use stable_diffusion::{SdVersion, StableDiffusionLoader, StableDiffusionPipeline};

/// Output resolution every model is built for.
pub const IMAGE_WIDTH: usize = 512;
pub const IMAGE_HEIGHT: usize = 512;

/// Generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionGenerationParams {
    /// Number of images produced by one call.
    pub batch_size: usize,
    /// The number of denoising steps. More denoising steps usually lead to a higher quality image at the
    /// expense of slower inference.
    pub num_steps: usize,
    /// Higher guidance scale encourages to generate images that are closely linked to the text `prompt`,
    /// usually at the expense of lower image quality.
    pub guidance_scale: f64,
    /// Seed for the initial noise. `None` draws fresh noise on every call.
    pub seed: Option<u64>,
}

/// How the backend should execute the model graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    Eager,
    /// Use fused/accelerated kernels where the backend provides them.
    Accelerated,
}

/// Everything a [`Loader`] needs to build a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub width: usize,
    pub height: usize,
    pub compile_mode: CompileMode,
    pub precision: Precision,
    pub silent: bool,
}

/// Builds a [`ModelPipeline`]. Implemented once per model backend.
pub trait Loader {
    type Pipeline: ModelPipeline;

    fn name(&self) -> &'static str;
    fn load(&self, params: &LoadParams) -> anyhow::Result<Self::Pipeline>;
}

/// A loaded text-to-image model.
pub trait ModelPipeline {
    /// Generate `params.batch_size` images for `prompt`.
    fn forward(
        &mut self,
        prompt: &str,
        params: &DiffusionGenerationParams,
    ) -> anyhow::Result<ImageBatch>;
}

/// Images produced by one generation call, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageBatch(Vec<DynamicImage>);

impl ImageBatch {
    pub fn new(images: Vec<DynamicImage>) -> Self {
        Self(images)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DynamicImage> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<DynamicImage> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ImageBatch {
    type Item = &'a DynamicImage;
    type IntoIter = std::slice::Iter<'a, DynamicImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build the model for this run at the fixed 512x512 resolution.
///
/// The precision string is validated before the loader is invoked.
pub fn initialize<L: Loader>(
    loader: &L,
    cfg: &RunConfiguration,
    silent: bool,
) -> Result<L::Pipeline> {
    let precision: Precision = cfg.precision.parse()?;
    let params = LoadParams {
        width: IMAGE_WIDTH,
        height: IMAGE_HEIGHT,
        compile_mode: cfg.compile_mode(),
        precision,
        silent,
    };
    if !silent {
        info!(
            "loading {} at {}x{}, {precision}, {:?} execution.",
            loader.name(),
            params.width,
            params.height,
            params.compile_mode
        );
    }
    loader.load(&params).map_err(Error::ModelLoad)
}

/// Split a `(batch, 3, height, width)` u8 tensor into RGB images.
pub(crate) fn images_from_tensor(img: &Tensor) -> anyhow::Result<ImageBatch> {
    let (b, c, h, w) = img.dims4()?;
    if c != 3 {
        anyhow::bail!("Expected 3 channels in image output, got {c}");
    }
    let mut images = Vec::with_capacity(b);
    for b_img in img.chunk(b, 0)? {
        let flattened = b_img.squeeze(0)?.permute((1, 2, 0))?.flatten_all()?;
        #[allow(clippy::cast_possible_truncation)]
        images.push(DynamicImage::ImageRgb8(
            RgbImage::from_raw(w as u32, h as u32, flattened.to_vec1::<u8>()?)
                .ok_or_else(|| anyhow::Error::msg("RgbImage has invalid capacity."))?,
        ));
    }
    Ok(ImageBatch(images))
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use image::Rgb;

    use super::images_from_tensor;

    #[test]
    fn splits_batch_into_rgb_images() -> anyhow::Result<()> {
        // Two 1x2 images, channel-major.
        let data: Vec<u8> = vec![
            10, 11, 20, 21, 30, 31, // image 0: r, g, b planes
            40, 41, 50, 51, 60, 61, // image 1
        ];
        let img = Tensor::from_vec(data, (2, 3, 1, 2), &Device::Cpu)?;
        let batch = images_from_tensor(&img)?;
        assert_eq!(batch.len(), 2);

        let first = batch.iter().next().map(|i| i.to_rgb8());
        let first = first.ok_or_else(|| anyhow::anyhow!("missing image"))?;
        assert_eq!(first.dimensions(), (2, 1));
        assert_eq!(*first.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*first.get_pixel(1, 0), Rgb([11, 21, 31]));

        let second = batch.into_inner().remove(1).to_rgb8();
        assert_eq!(*second.get_pixel(1, 0), Rgb([41, 51, 61]));
        Ok(())
    }

    #[test]
    fn rejects_non_rgb_tensors() -> anyhow::Result<()> {
        let img = Tensor::zeros((1, 4, 2, 2), DType::U8, &Device::Cpu)?;
        assert!(images_from_tensor(&img).is_err());
        Ok(())
    }
}
