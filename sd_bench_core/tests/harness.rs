use std::cell::{Cell, RefCell};

use image::{DynamicImage, Rgb, RgbImage};
use sd_bench_core::{
    initialize, render, CompileMode, DiffusionGenerationParams, Error, ImageBatch, InferenceRunner,
    LoadParams, Loader, ModelPipeline, Precision, RunConfiguration, IMAGE_HEIGHT, IMAGE_WIDTH,
    WARMUP_PROMPT,
};

#[derive(Debug, Clone, PartialEq)]
struct Call {
    prompt: String,
    params: DiffusionGenerationParams,
}

/// Records every call and paints each image with the 1-based call number.
#[derive(Default)]
struct RecordingPipeline {
    calls: Vec<Call>,
    /// Return this many images instead of the requested batch size.
    short_batch: Option<usize>,
    fail_on_call: Option<usize>,
}

impl ModelPipeline for RecordingPipeline {
    fn forward(
        &mut self,
        prompt: &str,
        params: &DiffusionGenerationParams,
    ) -> anyhow::Result<ImageBatch> {
        self.calls.push(Call {
            prompt: prompt.to_string(),
            params: params.clone(),
        });
        let call = self.calls.len();
        if self.fail_on_call == Some(call) {
            anyhow::bail!("out of memory");
        }
        let n = self.short_batch.unwrap_or(params.batch_size);
        #[allow(clippy::cast_possible_truncation)]
        let images = (0..n)
            .map(|i| {
                DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([call as u8, i as u8, 0])))
            })
            .collect::<Vec<_>>();
        Ok(ImageBatch::new(images))
    }
}

#[derive(Default)]
struct RecordingLoader {
    loads: Cell<usize>,
    last_params: RefCell<Option<LoadParams>>,
    fail: bool,
}

impl Loader for RecordingLoader {
    type Pipeline = RecordingPipeline;

    fn name(&self) -> &'static str {
        "recording"
    }

    fn load(&self, params: &LoadParams) -> anyhow::Result<RecordingPipeline> {
        self.loads.set(self.loads.get() + 1);
        *self.last_params.borrow_mut() = Some(*params);
        if self.fail {
            anyhow::bail!("connection refused");
        }
        Ok(RecordingPipeline::default())
    }
}

fn config(extra: &[&str]) -> anyhow::Result<RunConfiguration> {
    let argv = std::iter::once("sd_bench").chain(extra.iter().copied());
    Ok(RunConfiguration::try_from_iter(argv)?)
}

#[test]
fn test_initializer_builds_fixed_resolution_model() -> anyhow::Result<()> {
    let cfg = config(&["--precision", "fp16", "--use_xla"])?;
    let loader = RecordingLoader::default();
    initialize(&loader, &cfg, true)?;

    assert_eq!(loader.loads.get(), 1);
    let params = (*loader.last_params.borrow())
        .ok_or_else(|| anyhow::anyhow!("loader was not called"))?;
    assert_eq!((params.width, params.height), (IMAGE_WIDTH, IMAGE_HEIGHT));
    assert_eq!((params.width, params.height), (512, 512));
    assert_eq!(params.precision, Precision::Half);
    assert_eq!(params.compile_mode, CompileMode::Accelerated);
    Ok(())
}

#[test]
fn test_unsupported_precision_fails_before_loading() -> anyhow::Result<()> {
    let cfg = config(&["--precision", "int8"])?;
    let loader = RecordingLoader::default();
    match initialize(&loader, &cfg, true) {
        Err(Error::UnsupportedPrecision(p)) => assert_eq!(p, "int8"),
        Err(other) => panic!("expected UnsupportedPrecision, got {other:?}"),
        Ok(_) => panic!("expected UnsupportedPrecision, got a model"),
    }
    assert_eq!(loader.loads.get(), 0);
    Ok(())
}

#[test]
fn test_loader_failure_is_model_load_error() -> anyhow::Result<()> {
    let cfg = config(&[])?;
    let loader = RecordingLoader {
        fail: true,
        ..Default::default()
    };
    assert!(matches!(
        initialize(&loader, &cfg, true),
        Err(Error::ModelLoad(_))
    ));
    Ok(())
}

#[test]
fn test_invalid_batch_size_never_constructs_model() {
    let loader = RecordingLoader::default();
    let res = RunConfiguration::try_from_iter(["sd_bench", "--batch_size", "0"])
        .and_then(|cfg| initialize(&loader, &cfg, true).map(|_| ()));
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    assert_eq!(loader.loads.get(), 0);
}

#[test]
fn test_zero_counts_are_rejected_before_warmup() -> anyhow::Result<()> {
    let base = config(&[])?;
    let zeroed = [
        RunConfiguration {
            iterations: 0,
            ..base.clone()
        },
        RunConfiguration {
            batch_size: 0,
            ..base.clone()
        },
        RunConfiguration {
            num_steps: 0,
            ..base
        },
    ];
    for cfg in zeroed {
        let mut runner = InferenceRunner::new(RecordingPipeline::default()).silent(true);
        let res = runner.run(&cfg);
        assert!(
            matches!(res, Err(Error::InvalidArgument(_))),
            "expected InvalidArgument for {cfg:?}"
        );
        assert!(runner.pipeline().calls.is_empty(), "no warm-up for {cfg:?}");
    }
    Ok(())
}

#[test]
fn test_batch_length_matches_batch_size() -> anyhow::Result<()> {
    for batch_size in [1usize, 4] {
        let cfg = config(&["--batch_size", &batch_size.to_string()])?;
        let mut runner = InferenceRunner::new(RecordingPipeline::default()).silent(true);
        let report = runner.run(&cfg)?;
        assert_eq!(report.images().len(), batch_size);
    }
    Ok(())
}

#[test]
fn test_warmup_plus_iterations_and_last_batch_returned() -> anyhow::Result<()> {
    let cfg = config(&[
        "--iterations",
        "3",
        "--num_steps",
        "30",
        "--batch_size",
        "2",
        "--prompt",
        "a red fox",
    ])?;
    let mut runner = InferenceRunner::new(RecordingPipeline::default()).silent(true);
    let report = runner.run(&cfg)?;

    let calls = &runner.pipeline().calls;
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].prompt, WARMUP_PROMPT);
    for call in &calls[1..] {
        assert_eq!(call.prompt, "a red fox");
    }
    // Every call, warm-up included, gets the configured step count and batch size.
    for call in calls {
        assert_eq!(call.params.num_steps, 30);
        assert_eq!(call.params.batch_size, 2);
    }

    assert_eq!(report.timings().len(), 3);
    for (i, image) in report.images().iter().enumerate() {
        let pixel = *image.to_rgb8().get_pixel(0, 0);
        assert_eq!(pixel, Rgb([4, i as u8, 0]), "image {i} is from call 4");
    }
    Ok(())
}

#[test]
fn test_generation_failure_propagates() -> anyhow::Result<()> {
    let cfg = config(&["--iterations", "3"])?;
    let pipeline = RecordingPipeline {
        fail_on_call: Some(2),
        ..Default::default()
    };
    let mut runner = InferenceRunner::new(pipeline).silent(true);
    assert!(matches!(runner.run(&cfg), Err(Error::Generation(_))));
    assert_eq!(runner.pipeline().calls.len(), 2);
    Ok(())
}

#[test]
fn test_short_batch_is_generation_error() -> anyhow::Result<()> {
    let cfg = config(&["--batch_size", "3"])?;
    let pipeline = RecordingPipeline {
        short_batch: Some(1),
        ..Default::default()
    };
    let mut runner = InferenceRunner::new(pipeline).silent(true);
    assert!(matches!(runner.run(&cfg), Err(Error::Generation(_))));
    Ok(())
}

#[test]
fn test_render_writes_named_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().display().to_string();
    let cfg = config(&[
        "--precision",
        "fp16",
        "--batch_size",
        "2",
        "--num_steps",
        "30",
        "--iterations",
        "1",
        "--output_dir",
        &out,
    ])?;
    let report = InferenceRunner::new(RecordingPipeline::default())
        .silent(true)
        .run(&cfg)?;

    let path = render(report.images(), &cfg)?;
    assert_eq!(path, dir.path().join("fp16_2imgs_30steps.png"));

    let saved = image::open(&path)?.to_rgb8();
    assert_eq!(saved.dimensions(), (8, 4));
    assert_eq!(*saved.get_pixel(0, 0), Rgb([2, 0, 0]));
    assert_eq!(*saved.get_pixel(4, 0), Rgb([2, 1, 0]));

    // A second run overwrites the same file.
    let path_again = render(report.images(), &cfg)?;
    assert_eq!(path, path_again);
    Ok(())
}

#[test]
fn test_empty_batch_writes_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().display().to_string();
    let cfg = config(&["--output_dir", &out])?;

    let res = render(&ImageBatch::default(), &cfg);
    assert!(matches!(res, Err(Error::Render(_))));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}
