use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a generation run.
///
/// Nothing here is recovered from: every variant ends the run.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument is missing or a value is unusable, for example an empty prompt.
    #[error("invalid arguments: {0}")]
    Argument(String),

    /// The prompt path exists but could not be read.
    #[error("could not read prompt file `{}`: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The scheduler or the pipeline could not be loaded.
    #[error("failed to load model `{model_id}`: {cause:#}")]
    ModelLoad {
        model_id: String,
        cause: anyhow::Error,
    },

    /// The device identifier is unknown or the device is unavailable.
    #[error("cannot place pipeline on device `{device}`: {cause:#}")]
    Device {
        device: String,
        cause: anyhow::Error,
    },

    /// Inference failed.
    #[error("image generation failed: {0:#}")]
    Generation(anyhow::Error),

    /// The image could not be written.
    #[error("could not save image to `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn model_load(model_id: &str) -> impl FnOnce(anyhow::Error) -> Self + '_ {
        move |cause| Self::ModelLoad {
            model_id: model_id.to_string(),
            cause,
        }
    }

    pub(crate) fn device(device: &str) -> impl FnOnce(anyhow::Error) -> Self + '_ {
        move |cause| Self::Device {
            device: device.to_string(),
            cause,
        }
    }
}
