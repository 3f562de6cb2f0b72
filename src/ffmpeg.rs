//! FFmpeg command builder and runner.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};

/// Keep this many trailing bytes of stderr in errors.
const STDERR_TAIL: usize = 2000;

/// Argument list for one ffmpeg invocation, in order.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommand {
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn input(self, path: &Path) -> Self {
        self.arg("-i").path(path)
    }

    pub fn build_args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion; a non-zero exit becomes [`PipelineError::ToolFailed`].
    ///
    /// The child is killed if this future is dropped before it exits.
    pub async fn run(&self) -> Result<()> {
        which::which("ffmpeg").map_err(|_| PipelineError::ToolNotFound("ffmpeg".to_string()))?;
        debug!("Running FFmpeg: ffmpeg {}", self.args.join(" "));

        let output = Command::new("ffmpeg")
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_chars(&stderr, STDERR_TAIL);
            error!("ffmpeg exited with {}: {}", output.status, tail.trim());
            return Err(PipelineError::ToolFailed {
                tool: "ffmpeg".to_string(),
                status: output.status,
                stderr: Some(tail.to_string()),
            });
        }
        Ok(())
    }
}

fn tail_chars(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
