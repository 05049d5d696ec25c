use std::{fmt::Display, str::FromStr};

use candle_core::{DType, Device, Tensor};
use tracing::info;

use crate::Error;

/// Numeric precision of the model weights and activations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Precision {
    /// `fp32`
    Full,
    /// `fp16`
    Half,
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "fp32"),
            Self::Half => write!(f, "fp16"),
        }
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp32" => Ok(Self::Full),
            "fp16" => Ok(Self::Half),
            other => Err(Error::UnsupportedPrecision(other.to_string())),
        }
    }
}

/// Type which can be converted to a DType usable on a device.
pub trait TryIntoDType {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> anyhow::Result<DType>;
}

impl TryIntoDType for Precision {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> anyhow::Result<DType> {
        let dtype = match self {
            Self::Full => DType::F32,
            Self::Half => DType::F16,
        };
        // Try a matmul, some backends lack half precision kernels.
        let x = Tensor::zeros((2, 2), dtype, device)?;
        if let Err(e) = x.matmul(&x) {
            anyhow::bail!("{self} is not supported on {device:?}: {e}");
        }
        if !silent {
            info!("dtype selected is {dtype:?}.");
        }
        Ok(dtype)
    }
}
