//! Automated short-video pipeline: a generated children's story is split into
//! chunks, each chunk is narrated and illustrated, and the per-chunk clips are
//! joined into one video that can optionally be uploaded as a YouTube Short.

pub mod args;
pub mod audio;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod job;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod story;
pub mod tts;
pub mod upload;
pub mod utils;
pub mod video;

pub use error::{PipelineError, Result};
