//! Clip composition and lossless concatenation.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::ffmpeg::FfmpegCommand;

pub const FRAME_RATE: u32 = 24;
pub const FINAL_VIDEO_NAME: &str = "final_video.mp4";
pub const MANIFEST_NAME: &str = "chunks.txt";

/// Joins a still image and a narration track into a clip.
#[async_trait]
pub trait ClipComposer: Send + Sync {
    async fn compose(&self, image: &Path, audio: &Path, duration: f64, output: &Path) -> Result<()>;
}

/// Composes clips with ffmpeg: the image is looped for `duration` seconds at a
/// fixed frame rate, encoded with libx264 and aac.
#[derive(Debug, Clone, Default)]
pub struct FfmpegComposer;

pub fn compose_command(image: &Path, audio: &Path, duration: f64, output: &Path) -> FfmpegCommand {
    let fps = FRAME_RATE.to_string();
    FfmpegCommand::new()
        .arg("-y")
        .args(["-loop", "1", "-framerate", fps.as_str()])
        .input(image)
        .input(audio)
        .args(["-c:v", "libx264", "-tune", "stillimage", "-pix_fmt", "yuv420p"])
        .args(["-c:a", "aac", "-r", fps.as_str()])
        .args(["-t".to_string(), format!("{duration:.3}")])
        .arg("-shortest")
        .path(output)
}

#[async_trait]
impl ClipComposer for FfmpegComposer {
    async fn compose(&self, image: &Path, audio: &Path, duration: f64, output: &Path) -> Result<()> {
        compose_command(image, audio, duration, output).run().await?;
        info!("Clip written to {} ({:.2}s)", output.display(), duration);
        Ok(())
    }
}

/// Quote a path for the concat demuxer list format.
fn manifest_line(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    let normalized = absolute.to_string_lossy().replace('\\', "/");
    Ok(format!("file '{}'", normalized.replace('\'', r"'\''")))
}

/// Write the concat list, one clip per line, in the given order.
pub fn write_concat_manifest(clips: &[PathBuf], list_file: &Path) -> Result<()> {
    let mut f = File::create(list_file)?;
    for clip in clips {
        writeln!(f, "{}", manifest_line(clip)?)?;
    }
    f.flush()?;
    Ok(())
}

/// Concatenate clips without re-encoding into `out_dir/final_video.mp4`.
pub async fn concatenate(clips: &[PathBuf], out_dir: &Path) -> Result<PathBuf> {
    let list_file = out_dir.join(MANIFEST_NAME);
    write_concat_manifest(clips, &list_file)?;
    info!("Created concat list file {} ({} clips)", list_file.display(), clips.len());

    let final_path = out_dir.join(FINAL_VIDEO_NAME);
    concat_command(&list_file, &final_path).run().await?;
    Ok(final_path)
}

/// Stream-copy every clip named in `list_file` into `output`.
pub fn concat_command(list_file: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new()
        .args(["-f", "concat", "-r"])
        .arg(FRAME_RATE.to_string())
        .args(["-safe", "0"])
        .input(list_file)
        .args(["-c", "copy"])
        .path(output)
        .arg("-y")
}
