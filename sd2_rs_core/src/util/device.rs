use anyhow::{Context, Result};
use candle_core::Device;

/// Parse a device identifier such as `cpu`, `cuda`, `cuda:1`, `metal` or `mps`.
///
/// Accelerators that were not compiled in, or are not present, are reported as errors.
pub fn parse_device(name: &str) -> Result<Device> {
    let name = name.trim().to_ascii_lowercase();
    let (kind, ordinal) = match name.split_once(':') {
        Some((kind, ordinal)) => (
            kind,
            ordinal
                .parse::<usize>()
                .with_context(|| format!("invalid device ordinal `{ordinal}`"))?,
        ),
        None => (name.as_str(), 0),
    };
    match kind {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Ok(Device::new_cuda(ordinal)?),
        "metal" | "mps" => Ok(Device::new_metal(ordinal)?),
        other => anyhow::bail!(
            "unknown device `{other}`, expected one of `cpu`, `cuda[:N]`, `metal[:N]` or `mps`"
        ),
    }
}
