use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::SharedModelCache;

/// Turns chunk text into an illustration file.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf>;
}

/// Wrap chunk text in the house style so frames look alike across a video.
pub fn styled_prompt(text: &str) -> String {
    format!(
        "Whimsical 8K cartoon of {text}, vibrant colors, bold outlines, cute and playful style, \
         kid-friendly, magical background, high contrast, soft rounded shapes, fantasy elements"
    )
}

/// Image synthesis through the process-wide shared model.
pub struct SharedModelImages {
    model: Arc<SharedModelCache>,
}

impl SharedModelImages {
    pub fn new(model: Arc<SharedModelCache>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ImageSynthesizer for SharedModelImages {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf> {
        let model = self.model.resolve().await?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Generating image for prompt: {}", text);
        model.pipeline.generate(&styled_prompt(text), output).await?;
        info!("Image saved to: {}", output.display());
        Ok(output.to_path_buf())
    }
}
