use std::path::PathBuf;

use anyhow::{Context, Result as AnyResult};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    build_clip_transformer, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use image::DynamicImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use sd2_rs_common::{FileLoader, ModelSource, NiceProgressBar, TokenSource};

use super::{
    scheduler::EulerSchedulerConfig, tensor_to_image, ComponentName, DiffusionGenerationParams,
    PipelineProvider, StepProgress, TextToImagePipeline,
};
use crate::{
    util::{parse_device, ModelDType, TryIntoDType},
    Error, Result,
};

/// Repository with a complete `tokenizer.json` for the CLIP BPE vocabulary used by Stable Diffusion 2.
pub const CLIP_TOKENIZER_MODEL_ID: &str = "openai/clip-vit-base-patch32";

const PIPELINE_CLASS: &str = "StableDiffusionPipeline";
const VAE_SCALE: f64 = 0.18215;
const UNET_IN_CHANNELS: usize = 4;

#[derive(Clone, Debug, Deserialize)]
struct ModelIndex {
    #[serde(rename = "_class_name")]
    name: String,
}

/// Loads Stable Diffusion 2 pipelines with candle.
pub struct StableDiffusionProvider {
    params: DiffusionGenerationParams,
    token: TokenSource,
    revision: Option<String>,
    dtype: ModelDType,
    silent: bool,
}

impl StableDiffusionProvider {
    pub fn new(params: DiffusionGenerationParams) -> Self {
        Self {
            params,
            token: TokenSource::CacheToken,
            revision: None,
            dtype: ModelDType::Auto,
            silent: false,
        }
    }

    /// Token used for gated repositories. Defaults to the Hugging Face cache token.
    pub fn with_token(mut self, token: TokenSource) -> Self {
        self.token = token;
        self
    }

    /// Repository revision; `main` if unset.
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_dtype(mut self, dtype: ModelDType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Hide download and loading progress bars.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    fn file_loader(&self, source: &ModelSource) -> AnyResult<FileLoader> {
        FileLoader::from_model_source(
            source,
            self.silent,
            self.token.clone(),
            self.revision.clone(),
        )
    }

    fn load_components(
        &self,
        model_id: &str,
        scheduler: EulerSchedulerConfig,
    ) -> AnyResult<StableDiffusionPipeline> {
        let source = ModelSource::from_model_id(model_id)
            .override_tokenizer_model_id(CLIP_TOKENIZER_MODEL_ID)?;
        info!("loading from source: {source}.");
        let loader = self.file_loader(&source)?;
        let files = loader.list_files()?;

        if !files.contains(&"model_index.json".to_string()) {
            anyhow::bail!("Expected `model_index.json` file present.");
        }
        let ModelIndex { name } =
            serde_json::from_str(&loader.read_to_string("model_index.json", false)?)?;
        if name != PIPELINE_CLASS {
            anyhow::bail!("Unexpected pipeline type `{name}`, expected `{PIPELINE_CLASS}`.");
        }

        let mut weights = ComponentWeights::default();
        let mut tokenizer = None;
        for component in NiceProgressBar::<_, 'g'>(
            [
                ComponentName::Tokenizer,
                ComponentName::TextEncoder,
                ComponentName::Unet,
                ComponentName::Vae,
            ]
            .into_iter(),
            "Loading components",
        ) {
            match component {
                ComponentName::Tokenizer => {
                    let path = loader.read_file("tokenizer.json", true)?;
                    tokenizer = Some(Tokenizer::from_file(path).map_err(anyhow::Error::msg)?);
                }
                ComponentName::TextEncoder => {
                    let file = weights_file(&files, &component)?;
                    weights.clip = Some(loader.read_file(&file, false)?);
                }
                ComponentName::Unet => {
                    let file = weights_file(&files, &component)?;
                    weights.unet = Some(loader.read_file(&file, false)?);
                }
                ComponentName::Vae => {
                    let file = weights_file(&files, &component)?;
                    weights.vae = Some(loader.read_file(&file, false)?);
                }
                ComponentName::Scheduler => (),
            }
        }

        let sd_config =
            StableDiffusionConfig::v2_1(None, Some(self.params.height), Some(self.params.width));

        Ok(StableDiffusionPipeline {
            model_id: model_id.to_string(),
            tokenizer: tokenizer.context("tokenizer was not loaded")?,
            weights: weights.complete()?,
            scheduler,
            sd_config,
            params: self.params.clone(),
            dtype: self.dtype,
            silent: self.silent,
            models: None,
        })
    }
}

/// Pick the full precision `.safetensors` file of a component directory.
fn weights_file(files: &[String], component: &ComponentName) -> AnyResult<String> {
    let dir = format!("{component}/");
    let mut candidates = files
        .iter()
        .filter(|file| file.starts_with(&dir))
        .filter(|file| file.ends_with(".safetensors"))
        .filter(|file| !file.contains(".fp16."))
        .cloned()
        .collect::<Vec<_>>();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .with_context(|| format!("no safetensors weights found for `{component}`"))
}

/// Standard normal latents of shape `(1, 4, height / 8, width / 8)`.
///
/// candle cannot seed its CPU generator, so seeded CPU runs draw from a seeded `StdRng` instead.
fn initial_latents(
    device: &Device,
    seed: Option<u64>,
    height: usize,
    width: usize,
) -> AnyResult<Tensor> {
    let shape = (1, UNET_IN_CHANNELS, height / 8, width / 8);
    match seed {
        Some(seed) if device.is_cpu() => {
            let mut rng = StdRng::seed_from_u64(seed);
            let len = UNET_IN_CHANNELS * (height / 8) * (width / 8);
            let data: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();
            Ok(Tensor::from_vec(data, shape, device)?)
        }
        Some(seed) => {
            device.set_seed(seed)?;
            Ok(Tensor::randn(0f32, 1f32, shape, device)?)
        }
        None => Ok(Tensor::randn(0f32, 1f32, shape, device)?),
    }
}

#[derive(Default)]
struct ComponentWeights {
    clip: Option<PathBuf>,
    unet: Option<PathBuf>,
    vae: Option<PathBuf>,
}

struct ResolvedWeights {
    clip: PathBuf,
    unet: PathBuf,
    vae: PathBuf,
}

impl ComponentWeights {
    fn complete(self) -> AnyResult<ResolvedWeights> {
        Ok(ResolvedWeights {
            clip: self.clip.context("missing text encoder weights")?,
            unet: self.unet.context("missing unet weights")?,
            vae: self.vae.context("missing vae weights")?,
        })
    }
}

impl PipelineProvider for StableDiffusionProvider {
    type Scheduler = EulerSchedulerConfig;
    type Pipeline = StableDiffusionPipeline;

    fn load_scheduler(&self, model_id: &str) -> Result<EulerSchedulerConfig> {
        let load = || -> AnyResult<EulerSchedulerConfig> {
            let loader = self.file_loader(&ModelSource::from_model_id(model_id))?;
            let config_file = format!("{}/scheduler_config.json", ComponentName::Scheduler);
            EulerSchedulerConfig::from_json(&loader.read_to_string(&config_file, false)?)
        };
        load().map_err(Error::model_load(model_id))
    }

    fn load_pipeline(
        &self,
        model_id: &str,
        scheduler: EulerSchedulerConfig,
    ) -> Result<StableDiffusionPipeline> {
        self.params.validate()?;
        self.load_components(model_id, scheduler)
            .map_err(Error::model_load(model_id))
    }
}

/// Models built on a device.
struct PlacedModels {
    device: Device,
    dtype: DType,
    clip: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

/// A Stable Diffusion 2 pipeline. Weights are resolved on load and built on `place_on_device`.
pub struct StableDiffusionPipeline {
    model_id: String,
    tokenizer: Tokenizer,
    weights: ResolvedWeights,
    scheduler: EulerSchedulerConfig,
    sd_config: StableDiffusionConfig,
    params: DiffusionGenerationParams,
    dtype: ModelDType,
    silent: bool,
    models: Option<PlacedModels>,
}

impl StableDiffusionPipeline {
    fn build_models(&self, device: Device, dtype: DType) -> AnyResult<PlacedModels> {
        if !self.silent {
            info!("loading CLIP model");
        }
        // The text encoder stays in full precision.
        let clip = build_clip_transformer(
            &self.sd_config.clip,
            &self.weights.clip,
            &device,
            DType::F32,
        )?;
        if !self.silent {
            info!("loading UNet model");
        }
        let unet = self
            .sd_config
            .build_unet(&self.weights.unet, &device, UNET_IN_CHANNELS, false, dtype)?;
        if !self.silent {
            info!("loading VAE model");
        }
        let vae = self.sd_config.build_vae(&self.weights.vae, &device, dtype)?;
        Ok(PlacedModels {
            device,
            dtype,
            clip,
            unet,
            vae,
        })
    }

    /// Token ids padded to the CLIP context length. Overlong prompts are truncated, keeping the
    /// end-of-text token.
    fn tokenize(&self, prompt: &str, device: &Device) -> AnyResult<Tensor> {
        let clip = &self.sd_config.clip;
        let max_len = clip.max_position_embeddings;
        let pad_token = clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = self
            .tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("padding token `{pad_token}` is not in the vocabulary"))?;

        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            warn!(
                "prompt is {} tokens long, truncating to {max_len}",
                tokens.len()
            );
            let end = tokens.last().copied();
            tokens.truncate(max_len - 1);
            tokens.extend(end);
        }
        tokens.resize(max_len, pad_id);
        Ok(Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?)
    }

    fn denoise(
        &self,
        models: &PlacedModels,
        prompt: &str,
        mut on_step: Option<&mut dyn FnMut(StepProgress)>,
    ) -> AnyResult<DynamicImage> {
        let device = &models.device;

        let text_embeddings = models.clip.forward(&self.tokenize(prompt, device)?)?;
        let uncond_embeddings = models.clip.forward(&self.tokenize("", device)?)?;
        let text_embeddings =
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?.to_dtype(models.dtype)?;

        let mut scheduler = self.scheduler.build(self.params.num_steps)?;
        let latents = initial_latents(
            device,
            self.params.seed,
            self.sd_config.height,
            self.sd_config.width,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(models.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        let total = timesteps.len();
        for (step, &timestep) in timesteps.iter().enumerate() {
            let latent_model_input = Tensor::cat(&[&latents, &latents], 0)?;
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;

            let noise_pred =
                models
                    .unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = noise_pred.chunk(2, 0)?;
            let [noise_pred_uncond, noise_pred_text] = noise_pred.as_slice() else {
                anyhow::bail!("expected a conditional and an unconditional prediction");
            };
            let noise_pred = (noise_pred_uncond
                + ((noise_pred_text - noise_pred_uncond)? * self.params.guidance_scale)?)?;
            latents = scheduler.step(&noise_pred, timestep, &latents)?;

            if let Some(callback) = on_step.as_deref_mut() {
                callback(StepProgress { step, total });
            }
        }

        let img = models.vae.decode(&(latents / VAE_SCALE)?)?;
        let img = ((img / 2.)? + 0.5)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?;
        let img = (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?.i(0)?;
        tensor_to_image(&img)
    }
}

impl TextToImagePipeline for StableDiffusionPipeline {
    fn place_on_device(mut self, device: &str) -> Result<Self> {
        let placed_on = parse_device(device).map_err(Error::device(device))?;
        let dtype = self
            .dtype
            .try_into_dtype(&placed_on, self.silent)
            .map_err(Error::device(device))?;
        info!("running with device `{device}` ({placed_on:?}), dtype {dtype:?}");
        // Weights are materialized here, so a bad file surfaces as a load error.
        let models = self
            .build_models(placed_on, dtype)
            .map_err(Error::model_load(&self.model_id))?;
        self.models = Some(models);
        Ok(self)
    }

    fn generate(
        &mut self,
        prompt: &str,
        on_step: Option<&mut dyn FnMut(StepProgress)>,
    ) -> Result<DynamicImage> {
        let models = self.models.as_ref().ok_or_else(|| {
            Error::Generation(anyhow::Error::msg(
                "the pipeline has not been placed on a device",
            ))
        })?;
        self.denoise(models, prompt, on_step)
            .map_err(Error::Generation)
    }
}
