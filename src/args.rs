use std::path::PathBuf;

use clap::Parser;

use crate::tts::Gender;

/// Helper shipped in `scripts/`, resolved against the working directory.
pub const DEFAULT_DIFFUSION_BIN: &str = "scripts/storyshorts-diffuse";

#[derive(Parser, Debug)]
#[command(name = "storyshorts", about = "Generate an illustrated, narrated children's story video")]
pub struct Args {
    /// Image style; unknown values fall back to cartoon
    #[clap(long, default_value = "cartoon")]
    pub category: String,

    /// Chunks processed concurrently
    #[clap(long, default_value_t = 1)]
    pub workers: usize,

    /// Maximum number of chunks (one image each)
    #[clap(long, default_value_t = 4)]
    pub max_frames: usize,

    /// Narrator voice; random when omitted
    #[clap(long, value_enum)]
    pub gender: Option<Gender>,

    /// Upload the finished video to YouTube
    #[clap(long)]
    pub upload: bool,

    /// Root for videos/, audio/, frames/, story/ and logs/
    #[clap(long, default_value = ".")]
    pub output_root: PathBuf,

    #[clap(long, default_value = "prompts/jungle_story_prompts.csv")]
    pub prompts: PathBuf,

    /// Image generator run once per frame as `<bin> --model <snapshot> --pipeline <class>
    /// --dtype fp16|fp32 --device cuda|cpu --prompt <text> --output <png>`
    #[clap(long, default_value = DEFAULT_DIFFUSION_BIN)]
    pub diffusion_bin: PathBuf,

    /// Model cache directory; defaults to HF_HUB_CACHE, HF_HOME or ./.hf_cache
    #[clap(long)]
    pub model_cache: Option<PathBuf>,

    #[clap(long, default_value = "yt_credentials.json")]
    pub yt_credentials: PathBuf,
}
