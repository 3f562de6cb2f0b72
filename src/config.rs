//! Runtime configuration assembled from CLI arguments and the environment.

use std::path::{Path, PathBuf};

use crate::args::Args;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::tts::Gender;

const DEFAULT_MODEL_CACHE: &str = ".hf_cache";
const DEFAULT_CLIENT_SECRETS: &str = "client_secret.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub category: String,
    pub workers: usize,
    pub max_frames: usize,
    pub gender: Option<Gender>,
    pub upload: bool,
    pub output_root: PathBuf,
    pub prompts_path: PathBuf,
    pub diffusion_bin: PathBuf,
    pub model_cache: PathBuf,
    pub gemini_api_key: String,
    pub eleven_labs_api_key: String,
    pub hf_token: Option<String>,
    pub yt_client_secrets: PathBuf,
    pub yt_credentials: PathBuf,
    pub download_retry: RetryPolicy,
}

impl Config {
    /// Build from parsed arguments and the process environment.
    pub fn from_args(args: &Args) -> Result<Self> {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }

    fn from_lookup(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PipelineError::config(format!("{key} not set")))
        };
        if args.max_frames == 0 {
            return Err(PipelineError::config("--max-frames must be at least 1"));
        }

        Ok(Self {
            category: args.category.clone(),
            workers: args.workers.max(1),
            max_frames: args.max_frames,
            gender: args.gender,
            upload: args.upload,
            output_root: args.output_root.clone(),
            prompts_path: args.prompts.clone(),
            diffusion_bin: args.diffusion_bin.clone(),
            model_cache: model_cache_dir(args.model_cache.as_deref(), &lookup),
            gemini_api_key: require("GEMINI_API_KEY")?,
            eleven_labs_api_key: require("ELEVEN_LABS_API_KEY")?,
            hf_token: lookup("HF_TOKEN").filter(|t| !t.is_empty()),
            yt_client_secrets: lookup("YT_CLIENT_SECRETS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRETS)),
            yt_credentials: args.yt_credentials.clone(),
            download_retry: RetryPolicy::default(),
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_root.join("logs")
    }
}

fn model_cache_dir(explicit: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| lookup("HF_HUB_CACHE").map(PathBuf::from))
        .or_else(|| lookup("HF_HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_CACHE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const KEYS: &[(&str, &str)] = &[("GEMINI_API_KEY", "g"), ("ELEVEN_LABS_API_KEY", "e")];

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["storyshorts"]);
        let config = Config::from_lookup(&args, env(KEYS)).unwrap();

        assert_eq!(config.category, "cartoon");
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_frames, 4);
        assert!(config.gender.is_none());
        assert!(!config.upload);
        assert_eq!(config.model_cache, PathBuf::from(".hf_cache"));
        assert_eq!(config.yt_client_secrets, PathBuf::from("client_secret.json"));
        assert_eq!(config.download_retry.max_attempts, 3);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let args = Args::parse_from(["storyshorts"]);
        let err = Config::from_lookup(&args, env(&[("GEMINI_API_KEY", "g")])).unwrap_err();
        assert!(err.to_string().contains("ELEVEN_LABS_API_KEY"));
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "storyshorts",
            "--category",
            "anime",
            "--workers",
            "3",
            "--gender",
            "female",
            "--upload",
            "--model-cache",
            "/models",
        ]);
        let config = Config::from_lookup(&args, env(KEYS)).unwrap();
        assert_eq!(config.category, "anime");
        assert_eq!(config.workers, 3);
        assert_eq!(config.gender, Some(Gender::Female));
        assert!(config.upload);
        assert_eq!(config.model_cache, PathBuf::from("/models"));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let args = Args::parse_from(["storyshorts", "--max-frames", "0"]);
        assert!(Config::from_lookup(&args, env(KEYS)).is_err());
    }

    #[test]
    fn test_model_cache_env_precedence() {
        let both = env(&[("HF_HUB_CACHE", "/hub"), ("HF_HOME", "/home")]);
        assert_eq!(model_cache_dir(None, &both), PathBuf::from("/hub"));
        let home = env(&[("HF_HOME", "/home")]);
        assert_eq!(model_cache_dir(None, &home), PathBuf::from("/home"));
        assert_eq!(
            model_cache_dir(Some(Path::new("/cli")), &home),
            PathBuf::from("/cli")
        );
    }
}
