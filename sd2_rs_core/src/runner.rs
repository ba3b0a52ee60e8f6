use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use image::DynamicImage;
use tracing::info;

use crate::{
    pipelines::{PipelineProvider, StepProgress, TextToImagePipeline},
    Error, PromptSource, Result,
};

/// The pretrained model every run loads.
pub const MODEL_ID: &str = "stabilityai/stable-diffusion-2";

/// Where the image goes when no output path is given.
pub const DEFAULT_OUTPUT: &str = "output.png";

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub prompt: PromptSource,
    pub device: String,
    pub output: PathBuf,
}

impl Invocation {
    /// `prompt` is either the prompt text or a path to a file holding it.
    pub fn new<P: AsRef<str>, D: ToString>(prompt: P, device: D) -> Self {
        Self {
            prompt: PromptSource::from_arg(prompt),
            device: device.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }

    pub fn with_output<P: Into<PathBuf>>(mut self, output: P) -> Self {
        self.output = output.into();
        self
    }
}

/// Run one generation: resolve the prompt, load the model, place it on the device, generate and
/// save. The first failure ends the run and nothing after it is attempted.
///
/// Returns the path the image was written to.
pub fn run<P: PipelineProvider>(
    model_id: &str,
    invocation: &Invocation,
    provider: &P,
    on_step: Option<&mut dyn FnMut(StepProgress)>,
) -> Result<PathBuf> {
    let prompt = invocation.prompt.resolve()?;

    info!("loading scheduler");
    let scheduler = provider.load_scheduler(model_id)?;
    info!("loading pipeline");
    let pipeline = provider.load_pipeline(model_id, scheduler)?;
    info!("running with {}", invocation.device);
    let mut pipeline = pipeline.place_on_device(&invocation.device)?;

    let start = Instant::now();
    let image = pipeline.generate(&prompt, on_step)?;
    info!(
        "image generation took: {:.2}s",
        start.elapsed().as_secs_f32()
    );

    save_image(&image, &invocation.output)?;
    info!("saved image to {}", invocation.output.display());
    Ok(invocation.output.clone())
}

/// Write `image` to `path`, replacing any existing file. The format follows the extension.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
