//! Image-generation model lifecycle.
//!
//! - [`Category`] maps a visual style to an ordered allow-list of model repositories
//! - [`ModelCache`] inspects and repairs the local hub-style model cache
//! - [`HubBackend`] downloads snapshots and prepares [`DiffusionCli`] handles
//! - [`SharedModelCache`] resolves and loads one model per process

mod cache;
mod diffusion;
mod hub;
mod shared;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

pub use cache::ModelCache;
pub use diffusion::DiffusionCli;
pub use hub::HubBackend;
pub use shared::{LoadedModel, ModelState, SharedModelCache};

/// Visual style of the generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Cartoon,
    Motivational,
    Anime,
}

impl Category {
    pub const DEFAULT: Category = Category::Cartoon;

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cartoon" => Some(Self::Cartoon),
            "motivational" => Some(Self::Motivational),
            "anime" => Some(Self::Anime),
            _ => None,
        }
    }

    /// Like [`Category::from_name`] but falls back to the default category.
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!(
                "Invalid category '{}'. Defaulting to '{}'",
                name,
                Self::DEFAULT.name()
            );
            Self::DEFAULT
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cartoon => "cartoon",
            Self::Motivational => "motivational",
            Self::Anime => "anime",
        }
    }

    /// Model repositories allowed for this category, in preference order.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Cartoon => &[
                "Lykon/DreamShaper",
                "artificialguybr/storybookredmond-1-5-version-storybook-kids-lora-style-for-sd-1-5",
                "prompthero/openjourney-v4",
                "ainz/diseny-pixar",
                "nitrosocke/mo-di-diffusion",
                "ProGamerGov/Min-Illust-Background-Diffusion",
                "dreamlike-art/dreamlike-photoreal-2.0",
            ],
            Self::Motivational => &[
                "stabilityai/stable-diffusion-xl-base-1.0",
                "HyperX-Sentience/MJ-LoRA-Midjourney-SD-Mix",
                "Shakker-Labs/FLUX.1-dev-ControlNet-Union-Pro-2.0",
            ],
            Self::Anime => &["cagliostrolab/animagine-xl-3.0"],
        }
    }
}

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cuda,
    Cpu,
}

impl ComputeDevice {
    /// Pick CUDA when an NVIDIA driver is visible, otherwise fall back to CPU.
    pub fn detect() -> Self {
        let hidden = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| v.trim().is_empty() || v.trim() == "-1")
            .unwrap_or(false);
        let device = if !hidden && which::which("nvidia-smi").is_ok() {
            Self::Cuda
        } else {
            Self::Cpu
        };
        info!("Using compute device: {}", device.as_str());
        device
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        }
    }

    /// Reduced precision only pays off with hardware acceleration.
    pub fn precision(self) -> Precision {
        match self {
            Self::Cuda => Precision::Fp16,
            Self::Cpu => Precision::Fp32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Fp16,
    Fp32,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fp16 => "fp16",
            Self::Fp32 => "fp32",
        }
    }
}

/// Options for materializing a model handle.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub device: ComputeDevice,
    pub precision: Precision,
    /// Refuse to touch the network; only the local cache may be used.
    pub local_files_only: bool,
}

impl LoadOptions {
    pub fn for_device(device: ComputeDevice, local_files_only: bool) -> Self {
        Self {
            device,
            precision: device.precision(),
            local_files_only,
        }
    }
}

/// A loaded text-to-image pipeline.
#[async_trait]
pub trait ImagePipeline: Send + Sync {
    /// Generate one image for `prompt` and save it to `output`.
    async fn generate(&self, prompt: &str, output: &Path) -> Result<()>;
}

/// Fetches model snapshots and turns them into loaded pipelines.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Fetch the files a `precision` pipeline needs into `cache`.
    async fn download(&self, model_id: &str, cache: &ModelCache, precision: Precision) -> Result<()>;

    async fn load(
        &self,
        model_id: &str,
        cache: &ModelCache,
        options: &LoadOptions,
    ) -> Result<Arc<dyn ImagePipeline>>;
}
