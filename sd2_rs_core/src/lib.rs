//! Core crate of sd2_rs: text-to-image generation with Stable Diffusion 2.
//!
//! A run resolves the prompt, loads a scheduler and a pipeline from a [`PipelineProvider`], places
//! the pipeline on a device, generates one image and saves it.
//!
//! ```rust,no_run
//! use sd2_rs_core::{
//!     run, DiffusionGenerationParams, Invocation, StableDiffusionProvider, StepProgress, MODEL_ID,
//! };
//!
//! let provider = StableDiffusionProvider::new(DiffusionGenerationParams::default());
//! let invocation = Invocation::new("a red cube", "cpu").with_output("cube.png");
//!
//! let mut report = |progress: StepProgress| {
//!     println!("step {} of {}", progress.step, progress.total);
//! };
//! run(MODEL_ID, &invocation, &provider, Some(&mut report))?;
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod error;
mod pipelines;
mod prompt;
mod runner;
mod util;

pub use error::{Error, Result};
pub use pipelines::{
    BetaSchedule, DiffusionGenerationParams, EulerSchedulerConfig, PipelineProvider,
    PredictionType, StableDiffusionPipeline, StableDiffusionProvider, StepProgress,
    TextToImagePipeline, TimestepSpacing,
};
pub use prompt::PromptSource;
pub use runner::{run, save_image, Invocation, DEFAULT_OUTPUT, MODEL_ID};
pub use sd2_rs_common::TokenSource;
pub use util::{parse_device, ModelDType, TryIntoDType};
