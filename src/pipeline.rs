use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::audio::wav_duration_seconds;
use crate::error::Result;
use crate::frames::ImageSynthesizer;
use crate::session::JobSession;
use crate::tts::AudioSynthesizer;
use crate::utils::Chunk;
use crate::video::ClipComposer;

/// A compiled per-chunk video.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipResult {
    pub index: usize,
    pub path: PathBuf,
    /// Seconds; equal to the narration length.
    pub duration: f64,
}

/// Produces the clip for one chunk.
#[async_trait]
pub trait ChunkProcessor: Send + Sync + 'static {
    async fn process(&self, chunk: &Chunk) -> Result<ClipResult>;
}

/// Audio, then image, then clip for a single chunk.
pub struct ChunkPipeline {
    audio: Arc<dyn AudioSynthesizer>,
    images: Arc<dyn ImageSynthesizer>,
    composer: Arc<dyn ClipComposer>,
    session: JobSession,
}

impl ChunkPipeline {
    pub fn new(
        audio: Arc<dyn AudioSynthesizer>,
        images: Arc<dyn ImageSynthesizer>,
        composer: Arc<dyn ClipComposer>,
        session: JobSession,
    ) -> Self {
        Self {
            audio,
            images,
            composer,
            session,
        }
    }
}

#[async_trait]
impl ChunkProcessor for ChunkPipeline {
    async fn process(&self, chunk: &Chunk) -> Result<ClipResult> {
        let audio_path = self.session.audio_path(chunk.index);
        let image_path = self.session.image_path(chunk.index);
        let clip_path = self.session.clip_path(chunk.index);
        debug!("Chunk {} text: {}", chunk.index, chunk.text);

        self.audio.synthesize(&chunk.text, &audio_path).await?;
        self.images.synthesize(&chunk.text, &image_path).await?;

        let duration = wav_duration_seconds(&audio_path)?;
        if let Some(dir) = clip_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        self.composer
            .compose(&image_path, &audio_path, duration, &clip_path)
            .await?;

        info!("Finished chunk {}: {}", chunk.index, clip_path.display());
        Ok(ClipResult {
            index: chunk.index,
            path: clip_path,
            duration,
        })
    }
}
