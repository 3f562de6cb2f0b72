use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use super::{ImagePipeline, LoadOptions};
use crate::error::{PipelineError, Result};

/// Diffusion pipeline backed by an external inference CLI pointed at a cached
/// snapshot directory.
#[derive(Debug, Clone)]
pub struct DiffusionCli {
    bin: PathBuf,
    snapshot: PathBuf,
    pipeline_class: String,
    options: LoadOptions,
}

impl DiffusionCli {
    pub fn new(
        bin: impl Into<PathBuf>,
        snapshot: impl Into<PathBuf>,
        pipeline_class: impl Into<String>,
        options: LoadOptions,
    ) -> Self {
        Self {
            bin: bin.into(),
            snapshot: snapshot.into(),
            pipeline_class: pipeline_class.into(),
            options,
        }
    }

    pub fn pipeline_class(&self) -> &str {
        &self.pipeline_class
    }

    fn build_args(&self, prompt: &str, output: &Path) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.snapshot.to_string_lossy().into_owned(),
            "--pipeline".to_string(),
            self.pipeline_class.clone(),
            "--dtype".to_string(),
            self.options.precision.as_str().to_string(),
            "--device".to_string(),
            self.options.device.as_str().to_string(),
            "--prompt".to_string(),
            prompt.to_string(),
            "--output".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl ImagePipeline for DiffusionCli {
    async fn generate(&self, prompt: &str, output: &Path) -> Result<()> {
        let args = self.build_args(prompt, output);
        debug!("Running {} {}", self.bin.display(), args.join(" "));

        let result = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            error!("Diffusion command failed for {}: {}", output.display(), stderr.trim());
            return Err(PipelineError::ToolFailed {
                tool: self.bin.to_string_lossy().into_owned(),
                status: result.status,
                stderr: Some(stderr),
            });
        }
        if !output.is_file() {
            return Err(PipelineError::generation(format!(
                "diffusion command produced no image at {}",
                output.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComputeDevice;

    #[test]
    fn test_args_carry_precision_and_device() {
        let cli = DiffusionCli::new(
            "storyshorts-diffuse",
            "/cache/models--a--b/snapshots/r1",
            "StableDiffusionXLPipeline",
            LoadOptions::for_device(ComputeDevice::Cuda, false),
        );
        let args = cli.build_args("a fox", Path::new("/tmp/out.png"));
        assert_eq!(
            args,
            vec![
                "--model",
                "/cache/models--a--b/snapshots/r1",
                "--pipeline",
                "StableDiffusionXLPipeline",
                "--dtype",
                "fp16",
                "--device",
                "cuda",
                "--prompt",
                "a fox",
                "--output",
                "/tmp/out.png",
            ]
        );
    }

    #[test]
    fn test_shipped_generator_accepts_every_flag() {
        let bin = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join(crate::args::DEFAULT_DIFFUSION_BIN);
        let script = std::fs::read_to_string(&bin).unwrap();

        let cli = DiffusionCli::new(
            &bin,
            "/snapshot",
            "StableDiffusionPipeline",
            LoadOptions::for_device(ComputeDevice::Cpu, true),
        );
        let flags: Vec<String> = cli
            .build_args("a fox", Path::new("/tmp/out.png"))
            .into_iter()
            .filter(|a| a.starts_with("--"))
            .collect();
        assert_eq!(flags.len(), 6);
        for flag in flags {
            assert!(script.contains(&format!("\"{flag}\"")), "{flag} not accepted");
        }
    }
}
