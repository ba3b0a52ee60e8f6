//! Download every file the `sd2` binary needs into the Hugging Face cache, without running inference.

use clap::Parser;
use sd2_rs_core::{
    DiffusionGenerationParams, PipelineProvider, StableDiffusionProvider, TokenSource, MODEL_ID,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cache the Stable Diffusion 2 model files", long_about = None)]
struct Args {
    /// Hugging Face token source: `literal:<token>`, `env[:<var>]`, `path:<file>`, `cache` or `none`.
    #[arg(long, default_value = "cache")]
    token: TokenSource,

    /// Model repository revision. Defaults to `main`.
    #[arg(long)]
    revision: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let provider = StableDiffusionProvider::new(DiffusionGenerationParams::default())
        .with_token(args.token)
        .with_revision(args.revision);

    info!("loading scheduler");
    let scheduler = provider.load_scheduler(MODEL_ID)?;
    info!("loading pipeline");
    provider.load_pipeline(MODEL_ID, scheduler)?;
    info!("model files for `{MODEL_ID}` are cached");

    Ok(())
}
