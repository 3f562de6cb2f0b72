//! Error types for the video pipeline.

use std::process::ExitStatus;

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while producing a video.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Story is {len} characters, hard limit is {max}")]
    StoryTooLong { len: usize, max: usize },

    #[error("No usable image model found for category '{category}'")]
    NoUsableModel { category: String },

    #[error("Failed to download model {model_id}: {message}")]
    Download { model_id: String, message: String },

    #[error("Failed to load model {model_id}: {message}")]
    ModelLoad { model_id: String, message: String },

    #[error("No available voice for audio generation")]
    NoVoice,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} exited with {status}")]
    ToolFailed {
        tool: String,
        status: ExitStatus,
        stderr: Option<String>,
    },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Chunk processing stopped after an earlier failure")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl PipelineError {
    pub fn download(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    pub fn model_load(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Attach the chunk index to a per-chunk failure.
    pub fn in_chunk(self, index: usize) -> Self {
        match self {
            already @ Self::Chunk { .. } => already,
            other => Self::Chunk {
                index,
                source: Box::new(other),
            },
        }
    }
}
