use candle_core::Result;
use candle_transformers::models::stable_diffusion::{
    euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig,
    schedulers::{self, Scheduler, SchedulerConfig},
};
use serde::Deserialize;
use tracing::warn;

const EULER_SCHEDULER_CLASSES: [&str; 2] =
    ["EulerDiscreteScheduler", "EulerAncestralDiscreteScheduler"];

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BetaSchedule {
    #[serde(rename = "linear")]
    Linear,
    #[serde(rename = "scaled_linear")]
    ScaledLinear,
    #[serde(rename = "squaredcos_cap_v2")]
    SquaredcosCapV2,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionType {
    #[serde(rename = "epsilon")]
    Epsilon,
    #[serde(rename = "v_prediction")]
    VPrediction,
    #[serde(rename = "sample")]
    Sample,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestepSpacing {
    #[default]
    #[serde(rename = "leading")]
    Leading,
    #[serde(rename = "linspace")]
    Linspace,
    #[serde(rename = "trailing")]
    Trailing,
}

fn default_class_name() -> String {
    "EulerDiscreteScheduler".to_string()
}

fn default_beta_start() -> f64 {
    0.00085
}

fn default_beta_end() -> f64 {
    0.012
}

fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::ScaledLinear
}

fn default_prediction_type() -> PredictionType {
    PredictionType::Epsilon
}

fn default_steps_offset() -> usize {
    1
}

fn default_train_timesteps() -> usize {
    1000
}

/// Euler scheduler settings, read from a model's `scheduler/scheduler_config.json`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct EulerSchedulerConfig {
    #[serde(rename = "_class_name", default = "default_class_name")]
    pub class_name: String,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,
    #[serde(default = "default_prediction_type")]
    pub prediction_type: PredictionType,
    #[serde(default = "default_steps_offset")]
    pub steps_offset: usize,
    #[serde(rename = "num_train_timesteps", default = "default_train_timesteps")]
    pub train_timesteps: usize,
    #[serde(default)]
    pub timestep_spacing: TimestepSpacing,
}

impl EulerSchedulerConfig {
    /// Parse a scheduler config. The recorded class is informative only: an Euler scheduler is
    /// always built from the betas and prediction type.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if !EULER_SCHEDULER_CLASSES.contains(&config.class_name.as_str()) {
            warn!(
                "scheduler config is for `{}`, using it with an Euler scheduler",
                config.class_name
            );
        }
        Ok(config)
    }

    /// Build a scheduler for `num_steps` inference steps.
    ///
    /// This is the ancestral Euler sampler, which injects fresh noise at every step, so samples
    /// differ from those of the deterministic `EulerDiscreteScheduler` the config names.
    pub fn build(&self, num_steps: usize) -> Result<Box<dyn Scheduler>> {
        EulerAncestralDiscreteSchedulerConfig {
            beta_start: self.beta_start,
            beta_end: self.beta_end,
            beta_schedule: match self.beta_schedule {
                BetaSchedule::Linear => schedulers::BetaSchedule::Linear,
                BetaSchedule::ScaledLinear => schedulers::BetaSchedule::ScaledLinear,
                BetaSchedule::SquaredcosCapV2 => schedulers::BetaSchedule::SquaredcosCapV2,
            },
            steps_offset: self.steps_offset,
            prediction_type: match self.prediction_type {
                PredictionType::Epsilon => schedulers::PredictionType::Epsilon,
                PredictionType::VPrediction => schedulers::PredictionType::VPrediction,
                PredictionType::Sample => schedulers::PredictionType::Sample,
            },
            train_timesteps: self.train_timesteps,
            timestep_spacing: match self.timestep_spacing {
                TimestepSpacing::Leading => schedulers::TimestepSpacing::Leading,
                TimestepSpacing::Linspace => schedulers::TimestepSpacing::Linspace,
                TimestepSpacing::Trailing => schedulers::TimestepSpacing::Trailing,
            },
        }
        .build(num_steps)
    }
}
