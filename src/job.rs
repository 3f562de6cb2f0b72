//! One end-to-end run: topic, story, chunks, clips, final video, upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::frames::SharedModelImages;
use crate::model::{ComputeDevice, HubBackend, ModelCache, SharedModelCache};
use crate::orchestrator::ParallelOrchestrator;
use crate::pipeline::{ChunkPipeline, ChunkProcessor};
use crate::session::JobSession;
use crate::story::{GeminiClient, generate_story, load_topics, pick_topic};
use crate::tts::ElevenLabsTts;
use crate::upload::YouTubeUploader;
use crate::utils::chunk_story;
use crate::video::{FfmpegComposer, concatenate};

/// Split `story`, render every chunk and join the clips into the final video.
///
/// Nothing is concatenated unless every chunk produced a clip.
pub async fn create_video<P: ChunkProcessor>(
    story: &str,
    max_frames: usize,
    orchestrator: &ParallelOrchestrator<P>,
    session: &JobSession,
) -> Result<PathBuf> {
    let chunks = chunk_story(story, max_frames);
    if chunks.is_empty() {
        return Err(PipelineError::generation("story produced no chunks"));
    }
    info!(
        "Split story into {} chunks, {} worker(s)",
        chunks.len(),
        orchestrator.workers()
    );

    let clips = orchestrator.run(chunks).await?;
    let paths: Vec<PathBuf> = clips.into_iter().map(|clip| clip.path).collect();
    let final_path = concatenate(&paths, &session.video_dir).await?;
    info!("Final video written to {}", final_path.display());
    Ok(final_path)
}

/// Run the whole pipeline once and return the final video path.
pub async fn run(config: &Config) -> Result<PathBuf> {
    let session = JobSession::create(&config.output_root)?;
    info!("Job session {}", session.timestamp);

    let topics = load_topics(&config.prompts_path)?;
    let topic = pick_topic(&topics)
        .ok_or_else(|| PipelineError::config(format!("no topics in {}", config.prompts_path.display())))?;

    let writer = GeminiClient::new(config.gemini_api_key.clone());
    let (title, story) = generate_story(&writer, topic, &session).await?;

    let device = ComputeDevice::detect();
    let backend = HubBackend::new(config.diffusion_bin.clone(), config.hf_token.clone());
    let model = SharedModelCache::new(
        Arc::new(backend),
        ModelCache::new(config.model_cache.clone()),
        device,
        config.category.clone(),
    )
    .with_download_policy(config.download_retry.clone());

    let audio = ElevenLabsTts::connect(config.eleven_labs_api_key.clone(), config.gender).await;
    let pipeline = ChunkPipeline::new(
        Arc::new(audio),
        Arc::new(SharedModelImages::new(Arc::new(model))),
        Arc::new(FfmpegComposer),
        session.clone(),
    );
    let orchestrator = ParallelOrchestrator::new(Arc::new(pipeline), config.workers);

    let video = create_video(&story, config.max_frames, &orchestrator, &session).await?;

    if config.upload {
        let uploader = YouTubeUploader::new(&config.yt_client_secrets, &config.yt_credentials);
        publish(&uploader, &video, &title, &story).await?;
    }
    Ok(video)
}

/// Upload the finished video; a failure ends the job with the video left on disk.
async fn publish(uploader: &YouTubeUploader, video: &Path, title: &str, story: &str) -> Result<String> {
    uploader
        .upload(video, title, story)
        .await
        .inspect(|url| info!("Uploaded to {}", url))
        .inspect_err(|_| warn!("Upload failed, video kept at {}", video.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ClipResult;
    use crate::utils::Chunk;
    use async_trait::async_trait;

    struct FailingAt(usize);

    #[async_trait]
    impl ChunkProcessor for FailingAt {
        async fn process(&self, chunk: &Chunk) -> Result<ClipResult> {
            if chunk.index == self.0 {
                return Err(PipelineError::generation("image model out of memory"));
            }
            Ok(ClipResult {
                index: chunk.index,
                path: PathBuf::from(format!("chunk_{:03}/clip.mp4", chunk.index)),
                duration: 1.0,
            })
        }
    }

    #[tokio::test]
    async fn test_chunk_failure_skips_concatenation() {
        let tmp = tempfile::tempdir().unwrap();
        let session = JobSession::with_timestamp(tmp.path(), "20240101_000000").unwrap();
        let orchestrator = ParallelOrchestrator::new(Arc::new(FailingAt(1)), 2);
        let story = "One. Two. Three. Four.";

        let err = create_video(story, 4, &orchestrator, &session).await.unwrap_err();

        assert!(matches!(err, PipelineError::Chunk { index: 1, .. }));
        assert!(!session.video_dir.join("final_video.mp4").exists());
        assert!(!session.video_dir.join("chunks.txt").exists());
    }

    #[tokio::test]
    async fn test_empty_story_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let session = JobSession::with_timestamp(tmp.path(), "20240101_000000").unwrap();
        let orchestrator = ParallelOrchestrator::new(Arc::new(FailingAt(usize::MAX)), 1);

        assert!(create_video("   ", 4, &orchestrator, &session).await.is_err());
        assert!(!session.video_dir.join("final_video.mp4").exists());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("final_video.mp4");
        std::fs::write(&video, b"mp4").unwrap();
        let uploader = YouTubeUploader::new(
            tmp.path().join("client_secret.json"),
            tmp.path().join("yt_credentials.json"),
        );

        let err = publish(&uploader, &video, "A fox", "The fox slept.")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(video.is_file());
    }
}
