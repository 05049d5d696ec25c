use std::{fs, io::Cursor, path::PathBuf};

use image::{imageops, GenericImageView, ImageFormat, RgbImage};
use tracing::info;

use crate::{pipelines::ImageBatch, Error, Result, RunConfiguration};

/// `{precision}_{batch_size}imgs_{num_steps}steps.png`
pub fn output_filename(cfg: &RunConfiguration) -> String {
    format!(
        "{}_{}imgs_{}steps.png",
        cfg.precision, cfg.batch_size, cfg.num_steps
    )
}

/// Lay the images out left to right on one canvas. All images must share dimensions.
pub fn compose_row(images: &ImageBatch) -> Result<RgbImage> {
    let first = images
        .iter()
        .next()
        .ok_or_else(|| Error::Render("no images to render".to_string()))?;
    let (width, height) = first.dimensions();
    for (i, image) in images.iter().enumerate() {
        let dims = image.dimensions();
        if dims != (width, height) {
            return Err(Error::Render(format!(
                "image {i} is {}x{}, expected {width}x{height}",
                dims.0, dims.1
            )));
        }
    }

    let columns = u32::try_from(images.len())
        .map_err(|_| Error::Render(format!("too many images: {}", images.len())))?;
    let canvas_width = width
        .checked_mul(columns)
        .ok_or_else(|| Error::Render("canvas is too wide".to_string()))?;
    let mut canvas = RgbImage::new(canvas_width, height);
    for (i, image) in images.iter().enumerate() {
        let x = i64::from(width) * i as i64;
        imageops::replace(&mut canvas, &image.to_rgb8(), x, 0);
    }
    Ok(canvas)
}

/// Save the batch as a single PNG in `cfg.output_dir`, overwriting any previous file.
///
/// The PNG is encoded in memory first, so nothing is written on failure.
pub fn render(images: &ImageBatch, cfg: &RunConfiguration) -> Result<PathBuf> {
    let canvas = compose_row(images)?;
    let path = cfg.output_dir.join(output_filename(cfg));
    info!(
        "plotting {} generated image(s) to {}.",
        images.len(),
        path.display()
    );

    let mut buf = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::Render(format!("could not encode PNG: {e}")))?;
    fs::write(&path, buf)
        .map_err(|e| Error::Render(format!("could not write {}: {e}", path.display())))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage};

    use super::{compose_row, output_filename};
    use crate::{pipelines::ImageBatch, Error, RunConfiguration};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, 0, 0])))
    }

    #[test]
    fn filename_follows_run_parameters() -> anyhow::Result<()> {
        let cfg = RunConfiguration::try_from_iter([
            "sd_bench",
            "--precision",
            "fp16",
            "--batch_size",
            "2",
            "--num_steps",
            "30",
        ])?;
        assert_eq!(output_filename(&cfg), "fp16_2imgs_30steps.png");
        Ok(())
    }

    #[test]
    fn lays_images_out_in_order() -> anyhow::Result<()> {
        let batch = ImageBatch::new(vec![solid(3, 2, 1), solid(3, 2, 2), solid(3, 2, 3)]);
        let canvas = compose_row(&batch)?;
        assert_eq!(canvas.dimensions(), (9, 2));
        for (x, expected) in [(0, 1), (2, 1), (3, 2), (5, 2), (6, 3), (8, 3)] {
            assert_eq!(canvas.get_pixel(x, 1)[0], expected, "column {x}");
        }
        Ok(())
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let batch = ImageBatch::new(vec![solid(3, 2, 1), solid(2, 2, 1)]);
        assert!(matches!(compose_row(&batch), Err(Error::Render(_))));
    }
}
