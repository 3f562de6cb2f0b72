use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{Category, ComputeDevice, ImagePipeline, LoadOptions, ModelBackend, ModelCache};
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;

/// Lifecycle of the shared model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Resolving,
    Loaded,
    /// Terminal; carries the message of the failure.
    Failed(String),
}

/// A resolved and loaded image pipeline.
pub struct LoadedModel {
    pub model_id: String,
    pub category: Category,
    pub pipeline: Arc<dyn ImagePipeline>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.model_id)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Resolves, loads and memoizes one image model for the lifetime of the process.
///
/// Construct once and share it by `Arc`. The first call to [`resolve`] does the
/// expensive work while holding the init lock; concurrent callers wait on that
/// lock, later callers read the handle without locking.
///
/// [`resolve`]: SharedModelCache::resolve
pub struct SharedModelCache {
    backend: Arc<dyn ModelBackend>,
    cache: ModelCache,
    device: ComputeDevice,
    category: String,
    download_policy: RetryPolicy,
    loaded: OnceLock<Arc<LoadedModel>>,
    state: Mutex<ModelState>,
}

impl SharedModelCache {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        cache: ModelCache,
        device: ComputeDevice,
        category: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            device,
            category: category.into(),
            download_policy: RetryPolicy::default(),
            loaded: OnceLock::new(),
            state: Mutex::new(ModelState::Uninitialized),
        }
    }

    pub fn with_download_policy(mut self, policy: RetryPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn state(&self) -> ModelState {
        if self.loaded.get().is_some() {
            return ModelState::Loaded;
        }
        match self.state.try_lock() {
            Ok(state) => state.clone(),
            Err(_) => ModelState::Resolving,
        }
    }

    /// Return the shared model, resolving and loading it on first use.
    pub async fn resolve(&self) -> Result<Arc<LoadedModel>> {
        if let Some(model) = self.loaded.get() {
            return Ok(Arc::clone(model));
        }

        let mut state = self.state.lock().await;
        if let Some(model) = self.loaded.get() {
            return Ok(Arc::clone(model));
        }
        if let ModelState::Failed(message) = &*state {
            return Err(PipelineError::model_load(&self.category, message.clone()));
        }

        *state = ModelState::Resolving;
        match self.resolve_and_load().await {
            Ok(model) => {
                let model = Arc::new(model);
                // only reachable once: the lock is held and `loaded` was empty
                let _ = self.loaded.set(Arc::clone(&model));
                *state = ModelState::Loaded;
                Ok(model)
            }
            Err(e) => {
                error!("Image model initialization failed: {}", e);
                *state = ModelState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn resolve_and_load(&self) -> Result<LoadedModel> {
        let category = Category::resolve(&self.category);
        let candidates = category.candidates();

        let present: HashSet<String> = self.cache.cached_models().into_iter().collect();
        let cached: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|m| present.contains(*m) && self.cache.is_valid(m))
            .collect();

        if !cached.is_empty() {
            info!("Using cached models: {:?}", cached);
            let options = LoadOptions::for_device(self.device, true);
            for model_id in cached {
                match self.backend.load(model_id, &self.cache, &options).await {
                    Ok(pipeline) => return Ok(self.loaded_model(model_id, category, pipeline)),
                    Err(e @ PipelineError::ModelLoad { .. }) => self.discard(model_id, &e),
                    Err(e) => return Err(e),
                }
            }
        }

        let backend = &self.backend;
        let cache = &self.cache;
        let options = LoadOptions::for_device(self.device, false);
        for &model_id in candidates {
            let operation = format!("download {model_id}");
            let downloaded = self
                .download_policy
                .run(&operation, || backend.download(model_id, cache, options.precision))
                .await;
            if let Err(e) = downloaded {
                warn!("Giving up on model {}: {}", model_id, e);
                continue;
            }
            match self.backend.load(model_id, &self.cache, &options).await {
                Ok(pipeline) => return Ok(self.loaded_model(model_id, category, pipeline)),
                Err(e @ PipelineError::ModelLoad { .. }) => self.discard(model_id, &e),
                Err(e) => return Err(e),
            }
        }

        Err(PipelineError::NoUsableModel {
            category: category.name().to_string(),
        })
    }

    /// Drop a cache entry that failed to load so the next run starts clean.
    fn discard(&self, model_id: &str, reason: &PipelineError) {
        warn!("Model {} failed to load, purging: {}", model_id, reason);
        if let Err(purge_err) = self.cache.purge(model_id) {
            warn!("Could not purge {}: {}", model_id, purge_err);
        }
    }

    fn loaded_model(
        &self,
        model_id: &str,
        category: Category,
        pipeline: Arc<dyn ImagePipeline>,
    ) -> LoadedModel {
        info!("Image model ready: {} ({})", model_id, category.name());
        LoadedModel {
            model_id: model_id.to_string(),
            category,
            pipeline,
        }
    }
}
