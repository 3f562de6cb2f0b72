use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use crate::error::Result;

/// Directories scoped to one pipeline run, keyed by creation time.
///
/// Nothing here is ever cleaned up by the pipeline.
#[derive(Debug, Clone)]
pub struct JobSession {
    pub timestamp: String,
    pub video_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub frames_dir: PathBuf,
    pub story_dir: PathBuf,
}

impl JobSession {
    /// Create a session named after the current local time.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_timestamp(root, &timestamp)
    }

    pub fn with_timestamp(root: impl AsRef<Path>, timestamp: &str) -> Result<Self> {
        let root = root.as_ref();
        let session = Self {
            timestamp: timestamp.to_string(),
            video_dir: root.join("videos").join(timestamp),
            audio_dir: root.join("audio").join(timestamp),
            frames_dir: root.join("frames").join(timestamp),
            story_dir: root.join("story").join(timestamp),
        };
        for dir in [
            &session.video_dir,
            &session.audio_dir,
            &session.frames_dir,
            &session.story_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        debug!("Created job session {}", timestamp);
        Ok(session)
    }

    pub fn audio_path(&self, index: usize) -> PathBuf {
        self.audio_dir.join(format!("chunk_{index:03}.wav"))
    }

    pub fn image_path(&self, index: usize) -> PathBuf {
        self.frames_dir.join(format!("chunk_{index:03}.png"))
    }

    pub fn clip_path(&self, index: usize) -> PathBuf {
        self.video_dir
            .join(format!("chunk_{index:03}"))
            .join("clip.mp4")
    }

    pub fn story_path(&self) -> PathBuf {
        self.story_dir.join("story.txt")
    }
}
