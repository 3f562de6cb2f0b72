use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use tracing::{debug, info};

use super::cache::MANIFEST_FILE;
use super::{DiffusionCli, ImagePipeline, LoadOptions, ModelBackend, ModelCache, Precision};
use crate::error::{PipelineError, Result};

/// Downloads diffusers snapshots from the model hub into a [`ModelCache`] and
/// loads them as [`DiffusionCli`] pipelines.
pub struct HubBackend {
    token: Option<String>,
    diffusion_bin: PathBuf,
}

impl HubBackend {
    pub fn new(diffusion_bin: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            token,
            diffusion_bin: diffusion_bin.into(),
        }
    }

    fn api(&self, model_id: &str, cache: &ModelCache) -> Result<Api> {
        let mut builder = ApiBuilder::new()
            .with_cache_dir(cache.root().to_path_buf())
            .with_progress(false);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        builder
            .build()
            .map_err(|e| PipelineError::download(model_id, format!("hub client: {e}")))
    }
}

/// Files needed to run a diffusers pipeline: configs, tokenizer vocabularies
/// and safetensors weights. Legacy pickled and non-torch weights are skipped.
fn is_wanted_file(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    [".json", ".txt", ".model", ".safetensors"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

fn is_half_weight(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".fp16.safetensors")
}

fn half_variant(name: &str) -> String {
    let stem = name.strip_suffix(".safetensors").unwrap_or(name);
    format!("{stem}.fp16.safetensors")
}

/// Pick one weight file per component: the `.fp16.` variant for half
/// precision when the repository has it, the full weights otherwise.
fn select_files(names: &[&str], precision: Precision) -> Vec<String> {
    let available: HashSet<&str> = names.iter().copied().collect();
    names
        .iter()
        .copied()
        .filter(|name| is_wanted_file(name))
        .filter(|name| {
            if !name.to_ascii_lowercase().ends_with(".safetensors") {
                return true;
            }
            match precision {
                Precision::Fp32 => !is_half_weight(name),
                Precision::Fp16 => {
                    is_half_weight(name) || !available.contains(half_variant(name).as_str())
                }
            }
        })
        .map(str::to_string)
        .collect()
}

/// Check a snapshot the way a local-only load would: the manifest parses, names
/// its pipeline class and every listed component directory is present.
///
/// Returns the pipeline class name.
pub(crate) fn validate_snapshot(model_id: &str, snapshot: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(snapshot.join(MANIFEST_FILE))
        .map_err(|e| PipelineError::model_load(model_id, format!("{MANIFEST_FILE}: {e}")))?;
    let manifest: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::model_load(model_id, format!("{MANIFEST_FILE}: {e}")))?;
    let object = manifest
        .as_object()
        .ok_or_else(|| PipelineError::model_load(model_id, "manifest is not an object"))?;
    let class_name = object
        .get("_class_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::model_load(model_id, "manifest has no _class_name"))?;

    for (component, spec) in object {
        if component.starts_with('_') {
            continue;
        }
        // components are declared as [library, class]; [null, null] means absent
        let present = spec
            .as_array()
            .is_some_and(|parts| parts.iter().any(|p| !p.is_null()));
        if present && !snapshot.join(component).is_dir() {
            return Err(PipelineError::model_load(
                model_id,
                format!("component '{component}' missing from snapshot"),
            ));
        }
    }
    Ok(class_name.to_string())
}

#[async_trait]
impl ModelBackend for HubBackend {
    async fn download(&self, model_id: &str, cache: &ModelCache, precision: Precision) -> Result<()> {
        info!("Downloading model {} ({})", model_id, precision.as_str());
        let repo = self.api(model_id, cache)?.model(model_id.to_string());
        let info = repo
            .info()
            .await
            .map_err(|e| PipelineError::download(model_id, e.to_string()))?;

        let names: Vec<&str> = info.siblings.iter().map(|s| s.rfilename.as_str()).collect();
        let files = select_files(&names, precision);
        if !files.iter().any(|f| f == MANIFEST_FILE) {
            return Err(PipelineError::download(
                model_id,
                format!("repository has no {MANIFEST_FILE}"),
            ));
        }

        for file in &files {
            debug!("Fetching {}/{}", model_id, file);
            repo.get(file)
                .await
                .map_err(|e| PipelineError::download(model_id, format!("{file}: {e}")))?;
        }
        info!(
            "Downloaded {} files of {} at revision {}",
            files.len(),
            model_id,
            info.sha
        );
        Ok(())
    }

    async fn load(
        &self,
        model_id: &str,
        cache: &ModelCache,
        options: &LoadOptions,
    ) -> Result<Arc<dyn ImagePipeline>> {
        if !options.local_files_only && !cache.is_valid(model_id) {
            self.download(model_id, cache, options.precision).await?;
        }
        let snapshot = cache
            .snapshot_dir(model_id)
            .ok_or_else(|| PipelineError::model_load(model_id, "no snapshot in local cache"))?;
        let pipeline_class = validate_snapshot(model_id, &snapshot)?;
        which::which(&self.diffusion_bin).map_err(|_| {
            PipelineError::ToolNotFound(self.diffusion_bin.to_string_lossy().into_owned())
        })?;

        info!(
            "Loading model: {} ({}, {} on {})",
            model_id,
            pipeline_class,
            options.precision.as_str(),
            options.device.as_str()
        );
        Ok(Arc::new(DiffusionCli::new(
            self.diffusion_bin.clone(),
            snapshot,
            pipeline_class,
            *options,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SD_REPO: &[&str] = &[
        "model_index.json",
        "README.md",
        "v1-5-pruned.ckpt",
        "scheduler/scheduler_config.json",
        "text_encoder/config.json",
        "text_encoder/model.safetensors",
        "text_encoder/model.fp16.safetensors",
        "tokenizer/merges.txt",
        "tokenizer/vocab.json",
        "unet/config.json",
        "unet/diffusion_pytorch_model.bin",
        "unet/diffusion_pytorch_model.safetensors",
        "unet/diffusion_pytorch_model.fp16.safetensors",
        "vae/config.json",
        "vae/diffusion_pytorch_model.safetensors",
    ];

    #[test]
    fn test_wanted_files() {
        assert!(is_wanted_file("model_index.json"));
        assert!(is_wanted_file("unet/diffusion_pytorch_model.safetensors"));
        assert!(is_wanted_file("tokenizer/merges.txt"));
        assert!(!is_wanted_file("unet/diffusion_pytorch_model.bin"));
        assert!(!is_wanted_file("v1-5.ckpt"));
        assert!(!is_wanted_file("README.md"));
    }

    #[test]
    fn test_half_precision_takes_fp16_variants() {
        let files = select_files(SD_REPO, Precision::Fp16);
        assert!(files.contains(&"unet/diffusion_pytorch_model.fp16.safetensors".to_string()));
        assert!(files.contains(&"text_encoder/model.fp16.safetensors".to_string()));
        assert!(!files.contains(&"unet/diffusion_pytorch_model.safetensors".to_string()));
        // no fp16 copy of the vae, so the full weights are kept
        assert!(files.contains(&"vae/diffusion_pytorch_model.safetensors".to_string()));
        assert!(files.contains(&"model_index.json".to_string()));
    }

    #[test]
    fn test_full_precision_skips_fp16_variants() {
        let files = select_files(SD_REPO, Precision::Fp32);
        assert!(files.iter().all(|f| !f.contains(".fp16.")));
        assert!(files.contains(&"unet/diffusion_pytorch_model.safetensors".to_string()));
        assert!(files.contains(&"tokenizer/vocab.json".to_string()));
        assert!(!files.iter().any(|f| f.ends_with(".bin") || f.ends_with(".ckpt")));
    }

    #[test]
    fn test_validate_snapshot_accepts_complete_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{"_class_name": "StableDiffusionPipeline", "_diffusers_version": "0.21.0",
                "unet": ["diffusers", "UNet2DConditionModel"],
                "safety_checker": [null, null]}"#,
        )
        .unwrap();
        fs::create_dir(tmp.path().join("unet")).unwrap();

        let class = validate_snapshot("org/model", tmp.path()).unwrap();
        assert_eq!(class, "StableDiffusionPipeline");
    }

    #[test]
    fn test_validate_snapshot_rejects_missing_component() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{"_class_name": "StableDiffusionPipeline", "vae": ["diffusers", "AutoencoderKL"]}"#,
        )
        .unwrap();

        let err = validate_snapshot("org/model", tmp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
        assert!(err.to_string().contains("vae"));
    }

    #[test]
    fn test_validate_snapshot_rejects_truncated_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), r#"{"_class_name": "Stable"#).unwrap();
        assert!(validate_snapshot("org/model", tmp.path()).is_err());
    }

    #[tokio::test]
    async fn test_local_only_load_without_snapshot_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(tmp.path());
        let backend = HubBackend::new("storyshorts-diffuse", None);
        let options = LoadOptions::for_device(crate::model::ComputeDevice::Cpu, true);

        let err = backend.load("org/model", &cache, &options).await.err().unwrap();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
    }

    #[tokio::test]
    async fn test_local_only_load_rejects_incomplete_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(tmp.path());
        let snapshot = cache.seed_snapshot("org/model", "r1", &[]);
        fs::write(
            snapshot.join(MANIFEST_FILE),
            r#"{"_class_name": "StableDiffusionPipeline", "unet": ["diffusers", "UNet2DConditionModel"]}"#,
        )
        .unwrap();
        let backend = HubBackend::new("storyshorts-diffuse", None);
        let options = LoadOptions::for_device(crate::model::ComputeDevice::Cpu, true);

        let err = backend.load("org/model", &cache, &options).await.err().unwrap();
        assert!(err.to_string().contains("unet"));
    }
}
