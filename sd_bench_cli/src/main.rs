use clap::Parser;
use sd_bench_core::{
    initialize, render, Args, InferenceRunner, RunConfiguration, StableDiffusionLoader,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = RunConfiguration::try_from(args)?;

    let loader = StableDiffusionLoader::from_config(&cfg);
    let pipeline = initialize(&loader, &cfg, false)?;

    let mut runner = InferenceRunner::new(pipeline);
    let report = runner.run(&cfg)?;

    println!(
        "Warm-up took: {:.2}s, mean over {} iteration(s): {:.2}s ({:.3} images/s)",
        report.warmup().as_secs_f32(),
        report.timings().len(),
        report.mean_latency().as_secs_f32(),
        report.throughput()
    );

    let path = render(report.images(), &cfg)?;
    info!("saved images to {}.", path.display());

    Ok(())
}
