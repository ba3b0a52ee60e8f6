mod scheduler;
mod stable_diffusion;

use std::fmt::Display;

use anyhow::Result as AnyResult;
use candle_core::Tensor;
use image::{DynamicImage, RgbImage};

use crate::{Error, Result};

pub use scheduler::{BetaSchedule, EulerSchedulerConfig, PredictionType, TimestepSpacing};
pub use stable_diffusion::{StableDiffusionPipeline, StableDiffusionProvider};

/// Generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionGenerationParams {
    pub height: usize,
    pub width: usize,
    /// The number of denoising steps. More denoising steps usually lead to a higher quality image at the
    /// expense of slower inference.
    pub num_steps: usize,
    /// Higher guidance scale encourages to generate images that are closely linked to the text `prompt`,
    /// usually at the expense of lower image quality.
    pub guidance_scale: f64,
    /// Seed for the initial latents. Unseeded runs are not reproducible.
    pub seed: Option<u64>,
}

impl Default for DiffusionGenerationParams {
    fn default() -> Self {
        Self {
            height: 768,
            width: 768,
            num_steps: 50,
            guidance_scale: 7.5,
            seed: None,
        }
    }
}

impl DiffusionGenerationParams {
    /// Latents are an eighth of the image size, so both sides must be nonzero multiples of 8.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("height", self.height), ("width", self.width)] {
            if value == 0 || value % 8 != 0 {
                return Err(Error::Argument(format!(
                    "{name} must be a nonzero multiple of 8, got {value}"
                )));
            }
        }
        if self.num_steps == 0 {
            return Err(Error::Argument("at least one denoising step is required".to_string()));
        }
        Ok(())
    }
}

/// Reported once per denoising step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    /// 0-based index of the step that just finished.
    pub step: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentName {
    Scheduler,
    TextEncoder,
    Tokenizer,
    Unet,
    Vae,
}

impl Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduler => write!(f, "scheduler"),
            Self::TextEncoder => write!(f, "text_encoder"),
            Self::Tokenizer => write!(f, "tokenizer"),
            Self::Unet => write!(f, "unet"),
            Self::Vae => write!(f, "vae"),
        }
    }
}

/// Provides pretrained schedulers and pipelines by model id.
///
/// Loading may hit the network or the disk and can take a long time.
pub trait PipelineProvider {
    type Scheduler;
    type Pipeline: TextToImagePipeline;

    fn load_scheduler(&self, model_id: &str) -> Result<Self::Scheduler>;

    fn load_pipeline(&self, model_id: &str, scheduler: Self::Scheduler) -> Result<Self::Pipeline>;
}

/// A loaded text-to-image model.
pub trait TextToImagePipeline: Sized {
    /// Move the model onto the device named by `device`, for example `cpu` or `cuda:0`.
    fn place_on_device(self, device: &str) -> Result<Self>;

    /// Generate one image. `on_step` is called synchronously after every denoising step.
    fn generate(
        &mut self,
        prompt: &str,
        on_step: Option<&mut dyn FnMut(StepProgress)>,
    ) -> Result<DynamicImage>;
}

/// Convert a `(3, height, width)` u8 tensor into an RGB image.
pub(crate) fn tensor_to_image(img: &Tensor) -> AnyResult<DynamicImage> {
    let (c, h, w) = img.dims3()?;
    if c != 3 {
        anyhow::bail!("Expected 3 channels in image output");
    }
    let flattened = img.permute((1, 2, 0))?.flatten_all()?;
    #[allow(clippy::cast_possible_truncation)]
    let image = RgbImage::from_raw(w as u32, h as u32, flattened.to_vec1::<u8>()?)
        .ok_or_else(|| anyhow::Error::msg("RgbImage has invalid capacity."))?;
    Ok(DynamicImage::ImageRgb8(image))
}
