use std::path::PathBuf;

use clap::Parser;
use sd2_rs_core::{
    run, DiffusionGenerationParams, Invocation, ModelDType, StableDiffusionProvider, StepProgress,
    TokenSource, DEFAULT_OUTPUT, MODEL_ID,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate an image from a text prompt with Stable Diffusion 2", long_about = None)]
struct Args {
    /// A prompt, or a path to a file containing the prompt.
    #[arg(long)]
    prompt: String,

    /// The device to run the model on, for example `cpu`, `cuda:0` or `metal`.
    #[arg(long)]
    device: String,

    /// Path to save the final image to.
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Number of denoising steps. A higher number of steps often means higher quality.
    #[arg(long, default_value_t = DiffusionGenerationParams::default().num_steps)]
    num_steps: usize,

    /// Guidance scale to use. Higher values follow the prompt more closely.
    #[arg(long, default_value_t = DiffusionGenerationParams::default().guidance_scale)]
    guidance_scale: f64,

    /// Seed for the initial noise. Runs without a seed are not reproducible.
    #[arg(long)]
    seed: Option<u64>,

    /// Image height in pixels, a multiple of 8.
    #[arg(long, default_value_t = DiffusionGenerationParams::default().height)]
    height: usize,

    /// Image width in pixels, a multiple of 8.
    #[arg(long, default_value_t = DiffusionGenerationParams::default().width)]
    width: usize,

    /// Model dtype. `auto` picks half precision on accelerators and f32 on the CPU.
    #[arg(long, value_enum, default_value_t = ModelDType::Auto)]
    dtype: ModelDType,

    /// Hugging Face token source: `literal:<token>`, `env[:<var>]`, `path:<file>`, `cache` or `none`.
    /// By default, the Hugging Face token at ~/.cache/huggingface/token is used.
    #[arg(long, default_value = "cache")]
    token: TokenSource,

    /// Model repository revision. Defaults to `main`.
    #[arg(long)]
    revision: Option<String>,
}

impl Args {
    fn params(&self) -> DiffusionGenerationParams {
        DiffusionGenerationParams {
            height: self.height,
            width: self.width,
            num_steps: self.num_steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
        }
    }
}

/// The line supervisors scrape to follow a run.
fn progress_line(progress: StepProgress) -> String {
    format!(
        "sd2 iteration progress: {} of {}",
        progress.step, progress.total
    )
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    // stdout is reserved for the progress lines.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let params = args.params();
    params.validate()?;

    let provider = StableDiffusionProvider::new(params)
        .with_token(args.token)
        .with_revision(args.revision)
        .with_dtype(args.dtype);
    let invocation = Invocation::new(&args.prompt, &args.device).with_output(args.output);
    info!(
        "generating with `{MODEL_ID}` on device `{}`, writing to {}",
        invocation.device,
        invocation.output.display()
    );

    let mut report = |progress: StepProgress| println!("{}", progress_line(progress));
    run(MODEL_ID, &invocation, &provider, Some(&mut report))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::{error::ErrorKind, Parser};
    use sd2_rs_core::{DiffusionGenerationParams, ModelDType, StepProgress, TokenSource};

    use super::{progress_line, Args};

    #[test]
    fn minimal_invocation() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["sd2", "--prompt", "a red cube", "--device", "cpu"])?;
        assert_eq!(args.prompt, "a red cube");
        assert_eq!(args.device, "cpu");
        assert_eq!(args.output, PathBuf::from("output.png"));
        assert_eq!(args.params(), DiffusionGenerationParams::default());
        assert_eq!(args.dtype, ModelDType::Auto);
        assert_eq!(args.token, TokenSource::CacheToken);
        assert_eq!(args.revision, None);
        Ok(())
    }

    #[test]
    fn all_flags() -> anyhow::Result<()> {
        let args = Args::try_parse_from([
            "sd2",
            "--prompt",
            "./prompt.txt",
            "--device",
            "cuda:1",
            "--output",
            "out.png",
            "--num-steps",
            "25",
            "--guidance-scale",
            "9",
            "--seed",
            "42",
            "--height",
            "512",
            "--width",
            "640",
            "--dtype",
            "f16",
            "--token",
            "env:HF_TOKEN",
            "--revision",
            "fp16",
        ])?;
        assert_eq!(args.output, PathBuf::from("out.png"));
        assert_eq!(
            args.params(),
            DiffusionGenerationParams {
                height: 512,
                width: 640,
                num_steps: 25,
                guidance_scale: 9.0,
                seed: Some(42),
            }
        );
        assert_eq!(args.dtype, ModelDType::F16);
        assert_eq!(args.token, TokenSource::EnvVar("HF_TOKEN".to_string()));
        assert_eq!(args.revision.as_deref(), Some("fp16"));
        Ok(())
    }

    #[test]
    fn prompt_and_device_are_required() {
        for argv in [
            vec!["sd2", "--device", "cpu"],
            vec!["sd2", "--prompt", "a red cube"],
            vec!["sd2"],
        ] {
            let err = Args::try_parse_from(argv).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn bad_token_source_is_rejected() {
        let err = Args::try_parse_from([
            "sd2", "--prompt", "x", "--device", "cpu", "--token", "bogus",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn progress_lines_use_the_scraped_format() {
        assert_eq!(
            progress_line(StepProgress { step: 0, total: 50 }),
            "sd2 iteration progress: 0 of 50"
        );
        assert_eq!(
            progress_line(StepProgress { step: 49, total: 50 }),
            "sd2 iteration progress: 49 of 50"
        );
    }
}
