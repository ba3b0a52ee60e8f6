use std::fmt::Display;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use serde::Deserialize;
use tracing::info;

#[derive(Clone, Copy, Default, Debug, Deserialize, PartialEq, Eq, clap::ValueEnum)]
/// DType for the model.
///
/// Note: When using `Auto`, fallback pattern on accelerators is: F16 -> BF16 -> F32. The CPU always uses F32.
pub enum ModelDType {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "bf16")]
    BF16,
    #[serde(rename = "f16")]
    F16,
    #[serde(rename = "f32")]
    F32,
}

impl Display for ModelDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::BF16 => write!(f, "bf16"),
            Self::F16 => write!(f, "f16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Type which can be converted to a DType
pub trait TryIntoDType {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> Result<DType>;
}

/// Half precision first, as the reference weights are published for it.
const AUTO_CANDIDATES: [DType; 2] = [DType::F16, DType::BF16];

fn determine_auto_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        return DType::F32;
    }
    for dtype in AUTO_CANDIDATES {
        // Try a matmul
        let probe = Tensor::zeros((2, 2), dtype, device).and_then(|x| x.matmul(&x));
        if probe.is_ok() {
            return dtype;
        }
    }
    DType::F32
}

impl TryIntoDType for ModelDType {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> Result<DType> {
        let dtype = match self {
            Self::Auto => determine_auto_dtype(device),
            Self::BF16 => DType::BF16,
            Self::F16 => DType::F16,
            Self::F32 => DType::F32,
        };
        if !silent {
            info!("dtype selected is {dtype:?}.");
        }
        Ok(dtype)
    }
}
