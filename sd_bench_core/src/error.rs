use thiserror::Error;

/// Every way a benchmark run can fail. None of these are recovered from.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported precision `{0}`, expected one of: fp32, fp16")]
    UnsupportedPrecision(String),
    #[error("failed to load model")]
    ModelLoad(#[source] anyhow::Error),
    #[error("image generation failed")]
    Generation(#[source] anyhow::Error),
    #[error("failed to render images: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;
